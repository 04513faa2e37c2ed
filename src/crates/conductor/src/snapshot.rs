//! Status CSV snapshot: one row per non-source node, written under a file
//! lock with the column schema external renderers depend on.

use crate::error::Result;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use study::ExecutionGraph;
use utils::lock::FileLock;
use utils::State;

pub const COLUMNS: [&str; 11] = [
    "Step Name",
    "Workspace",
    "State",
    "Job ID",
    "Submit Time",
    "Start Time",
    "End Time",
    "Run Time",
    "Elapsed Time",
    "Number Restarts",
    "Params",
];

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn format_timestamp(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn format_span(start: Option<chrono::DateTime<chrono::Utc>>, end: Option<chrono::DateTime<chrono::Utc>>) -> String {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => {
            let millis = (end - start).num_milliseconds().max(0) as u64;
            utils::time::format_duration(Duration::from_millis(millis))
        }
        _ => String::new(),
    }
}

/// Render the graph's current state as a CSV document (header + one row per
/// non-source node, in the graph's insertion order).
pub fn render(graph: &ExecutionGraph) -> String {
    let mut out = String::new();
    out.push_str(&COLUMNS.join(","));
    out.push('\n');

    for name in graph.dag.names() {
        if name == study::SOURCE {
            continue;
        }
        let Some(record) = graph.record(name) else { continue };

        let job_id = record.jobids.last().cloned().unwrap_or_default();
        let params = record
            .params
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join(";");

        let run_time = format_span(record.start_time, record.end_time);
        let elapsed_time = format_span(record.submit_time, record.end_time);

        let row = [
            name.to_string(),
            record.workspace.clone(),
            record.state.to_string(),
            job_id,
            format_timestamp(record.submit_time),
            format_timestamp(record.start_time),
            format_timestamp(record.end_time),
            run_time,
            elapsed_time,
            record.num_restarts.to_string(),
            params,
        ];

        out.push_str(
            &row.iter()
                .map(|field| csv_field(field))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push('\n');
    }

    out
}

/// Write the snapshot to `<output_path>/status.csv` under `<output_path>/.status.lock`.
pub fn write(output_path: &Path, graph: &ExecutionGraph) -> Result<()> {
    let lock_path = output_path.join(".status.lock");
    let _lock = FileLock::acquire(&lock_path, LOCK_TIMEOUT)?;

    let csv_path = output_path.join("status.csv");
    let tmp_path = output_path.join(".status.csv.tmp");
    std::fs::write(&tmp_path, render(graph))?;
    std::fs::rename(&tmp_path, &csv_path)?;
    Ok(())
}

fn parse_state(name: &str) -> State {
    match name {
        "PENDING" => State::Pending,
        "WAITING" => State::Waiting,
        "RUNNING" => State::Running,
        "FINISHING" => State::Finishing,
        "FINISHED" => State::Finished,
        "QUEUED" => State::Queued,
        "FAILED" => State::Failed,
        "INCOMPLETE" => State::Incomplete,
        "HWFAILURE" => State::HwFailure,
        "TIMEDOUT" => State::TimedOut,
        "CANCELLED" => State::Cancelled,
        _ => State::Unknown,
    }
}

/// Split one CSV line into fields, undoing the quoting `csv_field` applies.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == ',' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

/// Parse a status snapshot back into a step name -> state map.
pub fn parse(csv_text: &str) -> HashMap<String, State> {
    let mut states = HashMap::new();
    for line in csv_text.lines().skip(1) {
        if line.is_empty() {
            continue;
        }
        let fields = split_csv_line(line);
        if fields.len() < 3 {
            continue;
        }
        states.insert(fields[0].clone(), parse_state(&fields[2]));
    }
    states
}

#[cfg(test)]
mod tests {
    use super::*;
    use study::{ExecutionStepRecord, StudyStep};

    #[test]
    fn render_emits_header_and_one_row_per_non_source_node() {
        let mut graph = ExecutionGraph::new(1, 0);
        let step = StudyStep::new("hello", "", study::RunConfig::default());
        let mut record = ExecutionStepRecord::new(step, "/out/hello", 0);
        record.jobids.push("42".to_string());
        record.state = utils::State::Finished;
        graph.add_step("hello", record);

        let csv = render(&graph);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Step Name,"));
        assert!(lines[1].starts_with("hello,/out/hello,FINISHED,42,"));
    }

    #[test]
    fn write_then_render_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = ExecutionGraph::new(1, 0);
        let step = StudyStep::new("hello", "", study::RunConfig::default());
        graph.add_step("hello", ExecutionStepRecord::new(step, "/out/hello", 0));

        write(dir.path(), &graph).unwrap();
        let content = std::fs::read_to_string(dir.path().join("status.csv")).unwrap();
        assert!(content.contains("hello"));
        assert!(content.contains("INITIALIZED"));
    }

    #[test]
    fn params_are_semicolon_joined_key_value_pairs() {
        let mut graph = ExecutionGraph::new(1, 0);
        let step = StudyStep::new("greet_NAME.Pam", "", study::RunConfig::default());
        let record = ExecutionStepRecord::new(step, "/out/greet/NAME.Pam", 0)
            .with_params(vec![("NAME".to_string(), "Pam".to_string())]);
        graph.add_step("greet_NAME.Pam", record);

        let csv = render(&graph);
        assert!(csv.contains("NAME:Pam"));
    }

    #[test]
    fn parse_recovers_the_state_map_render_wrote() {
        let mut graph = ExecutionGraph::new(1, 0);
        let step_a = StudyStep::new("hello", "", study::RunConfig::default());
        let mut record_a = ExecutionStepRecord::new(step_a, "/out/hello", 0);
        record_a.state = State::Finished;
        graph.add_step("hello", record_a);

        let step_b = StudyStep::new("world", "", study::RunConfig::default());
        graph.add_step("world", ExecutionStepRecord::new(step_b, "/out/world", 0));

        let states = parse(&render(&graph));
        assert_eq!(states.get("hello"), Some(&State::Finished));
        assert_eq!(states.get("world"), Some(&State::Initialized));
    }
}
