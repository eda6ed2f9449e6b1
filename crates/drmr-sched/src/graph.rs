//! Job dependency graph built from a parsed pipeline script.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::directive::{ArrayControl, DependencyState, JobDirective};
use crate::error::{SchedError, SchedResult};
use crate::script::{JobOptions, ScriptEvent};

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct JobNode {
    /// Name from a preceding `# drmr:label`.
    pub label: Option<String>,
    /// Options given on the job's own directive line.
    pub directive: JobDirective,
    /// Whether the run's configured defaults apply. False for `default` jobs.
    pub use_defaults: bool,
    /// Command lines, one per array index when there are several.
    pub commands: Vec<String>,
    pub array_control: Option<ArrayControl>,
}

impl JobNode {
    pub fn is_array(&self) -> bool {
        self.array_control.is_some()
    }
}

/// DAG of job nodes. Edges point from prerequisite to dependent.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    dag: DiGraph<JobNode, DependencyState>,
}

impl JobGraph {
    /// Build the graph from parser events.
    ///
    /// `max_concurrent` limits how many indices of each array job run at once.
    pub fn build(events: &[ScriptEvent], max_concurrent: Option<u32>) -> SchedResult<Self> {
        let builder = events
            .iter()
            .try_fold(GraphBuilder::new(max_concurrent), GraphBuilder::apply)?;
        Ok(builder.finish())
    }

    /// Node indices in submission order.
    pub fn submission_order(&self) -> SchedResult<Vec<NodeIndex>> {
        petgraph::algo::toposort(&self.dag, None).map_err(|_| SchedError::DependencyCycle)
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&JobNode> {
        self.dag.node_weight(idx)
    }

    /// Prerequisites of a node with the state each must reach.
    pub fn prerequisites(&self, idx: NodeIndex) -> Vec<(DependencyState, NodeIndex)> {
        let mut prerequisites: Vec<_> = self
            .dag
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| (*edge.weight(), edge.source()))
            .collect();
        prerequisites.sort();
        prerequisites
    }

    /// Whether the node waits on no other job in the graph.
    pub fn is_root(&self, idx: NodeIndex) -> bool {
        self.dag
            .edges_directed(idx, Direction::Incoming)
            .next()
            .is_none()
    }

    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.dag.node_count() == 0
    }
}

/// A job section still collecting commands.
#[derive(Debug)]
struct OpenJob {
    label: Option<String>,
    directive: JobDirective,
    use_defaults: bool,
    commands: Vec<String>,
}

/// Fold state while walking the event stream.
#[derive(Debug)]
struct GraphBuilder {
    dag: DiGraph<JobNode, DependencyState>,
    open: Option<OpenJob>,
    pending_label: Option<String>,
    /// Jobs declared since the last wait.
    since_wait: Vec<NodeIndex>,
    /// Jobs every newly declared job depends on.
    barrier: Vec<NodeIndex>,
    max_concurrent: Option<u32>,
}

impl GraphBuilder {
    fn new(max_concurrent: Option<u32>) -> Self {
        Self {
            dag: DiGraph::new(),
            open: None,
            pending_label: None,
            since_wait: Vec::new(),
            barrier: Vec::new(),
            max_concurrent,
        }
    }

    fn apply(mut self, event: &ScriptEvent) -> SchedResult<Self> {
        match event {
            ScriptEvent::Job(options) => {
                self.close_job();
                self.open = Some(self.open_job(options)?);
            }
            ScriptEvent::Command(command) => {
                if self.open.is_none() {
                    self.open = Some(OpenJob {
                        label: self.pending_label.take(),
                        directive: JobDirective::default(),
                        use_defaults: true,
                        commands: Vec::new(),
                    });
                }
                if let Some(open) = self.open.as_mut() {
                    open.commands.push(command.clone());
                }
            }
            ScriptEvent::Wait => {
                self.close_job();
                if !self.since_wait.is_empty() {
                    self.barrier = std::mem::take(&mut self.since_wait);
                }
            }
            ScriptEvent::Label(label) => {
                self.pending_label = Some(label.clone());
            }
        }
        Ok(self)
    }

    fn open_job(&mut self, options: &JobOptions) -> SchedResult<OpenJob> {
        let mut directive = JobDirective::default();
        for (key, value) in options.values() {
            directive.set(key, value).map_err(|e| {
                SchedError::parse(options.line_number, &options.line, e.to_string())
            })?;
        }

        Ok(OpenJob {
            label: self.pending_label.take(),
            directive,
            use_defaults: !options.use_defaults_only(),
            commands: Vec::new(),
        })
    }

    fn close_job(&mut self) {
        let Some(open) = self.open.take() else {
            return;
        };

        if open.commands.is_empty() {
            tracing::debug!("Dropping job with no commands (label {:?})", open.label);
            return;
        }

        let array_control = match u32::try_from(open.commands.len()) {
            Ok(count) if count > 1 => Some(ArrayControl::one_based(count, self.max_concurrent)),
            _ => None,
        };

        let idx = self.dag.add_node(JobNode {
            label: open.label,
            directive: open.directive,
            use_defaults: open.use_defaults,
            commands: open.commands,
            array_control,
        });

        for &prerequisite in &self.barrier {
            self.dag.add_edge(prerequisite, idx, DependencyState::Ok);
        }
        self.since_wait.push(idx);
    }

    fn finish(mut self) -> JobGraph {
        self.close_job();
        JobGraph { dag: self.dag }
    }
}
