use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::Workflow;
use crate::dependency::Dependency;

#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Timing of the tasks that ran during one call.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub execution_times: HashMap<Dependency, TaskExecution>,
}

impl Diagnostics {
    pub fn get(&self, dependency: &Dependency) -> Option<&TaskExecution> {
        self.execution_times.get(dependency)
    }

    /// Wall clock time from the first task start to the last task end.
    pub fn elapsed(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self
            .execution_times
            .values()
            .map(|t| t.start + t.duration)
            .max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Renders the workflow as a Mermaid flowchart, every node annotated with
    /// its run time and coloured from green (fastest) to red (slowest).
    pub fn render_mermaid(&self, workflow: &Workflow) -> String {
        let dag = workflow.dag();
        let times = &self.execution_times;

        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for t in times.values() {
            let secs = t.duration.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            // No tasks ran
            min_time = 0.0;
            max_time = 0.0;
        }

        // Avoid divide by zero if all tasks took same time
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        let mut f = String::new();
        let written = dag.write_mermaid(&mut f, |index| {
            let node = dag.node(index);

            match times.get(node) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);
                    Some((format!("{:.2?}", exec.duration), gradient(t)))
                }
                None => Some(("Not run".to_string(), "#D3D3D3".to_string())),
            }
        });

        written.map(|_| f).unwrap_or_default()
    }
}

/// Green (0.0) through yellow (0.5) to red (1.0).
fn gradient(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);

    let (r, g, b) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255, 0)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8, 0)
    };

    format!("#{r:02X}{g:02X}{b:02X}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_endpoints() {
        assert_eq!(gradient(0.0), "#00FF00");
        assert_eq!(gradient(0.5), "#FFFF00");
        assert_eq!(gradient(1.0), "#FF0000");
        assert_eq!(gradient(7.0), "#FF0000");
    }

    #[test]
    fn empty_diagnostics_have_no_elapsed_time() {
        assert_eq!(Diagnostics::default().elapsed(), Duration::ZERO);
    }
}
