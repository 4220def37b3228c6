use std::fmt::{Display, Formatter};

use std::io::Write;
use std::time::{Duration, Instant};

use std::sync::mpsc::{channel, Sender};
use std::thread::{JoinHandle, ThreadId};
#[cfg(feature = "buffered_out")]
use std::io::BufWriter;

use console::{pad_str_with, Alignment, style, pad_str};
#[cfg(feature = "branch-graphviz")]
use std::fs::OpenOptions;

use crate::misc::{NodeHandle, OrigVarId};

/// Struct to hold the UI
/// Particulary the printing thread
pub struct UI {
    sender: UISender,
    printer: Option<JoinHandle<()>>,
}


#[derive(Clone)]
pub struct UISender {
    sender: Sender<UIMessage>,
}


impl UISender {
    /// Send typed UIMessage to internal channel.
    /// Messages to a closed UI are dropped.
    pub fn send(&self, user_msg: UIUserMessage) {
        #[cfg(not(feature = "disable_ui"))]
        let _ = self.sender.send(UIMessage {
            thread_id: std::thread::current().id(),
            message: user_msg,
        });
        #[cfg(feature = "disable_ui")]
        drop(user_msg);
    }

    /// Sender without a printing thread, everything is discarded
    pub fn silent() -> Self {
        let (sender, _) = channel();
        Self { sender }
    }
}

impl UI {

    pub fn get_sender(&self) -> UISender {
        self.sender.clone()
    }

    /// Waits until the printing thread has seen `ExitUi`
    pub fn wait(mut self) {
        if let Some(printer) = self.printer.take() {
            let _ = printer.join();
        }
    }

    pub fn new() -> Self {

        let (sender, receiver) = channel::<UIMessage>();

        #[cfg(not(feature = "disable_ui"))]
        let printer = Some(std::thread::spawn(move || {

            #[cfg(feature = "branch-graphviz")]
            let mut graphviz_branch_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open("/tmp/branching_tree.dot")
                .ok();

            #[cfg(feature = "branch-graphviz")]
            if let Some(file) = graphviz_branch_file.as_mut() {
                let _ = file.write_all(b"digraph {\n");
            }

            #[cfg(not(feature = "locked_out"))]
            let stdout = std::io::stdout();
            #[cfg(feature = "locked_out")]
            let stdout = std::io::stdout().lock();

            #[cfg(not(feature = "buffered_out"))]
            let mut buffered_out = stdout;
            #[cfg(feature = "buffered_out")]
            let mut buffered_out = BufWriter::with_capacity(512, stdout);

            let start_time = Instant::now();

            let mut total_pricing_runtime = 0.0;
            let mut total_lp_runtime = 0.0;
            let mut num_anomalies = 0usize;

            #[cfg(feature = "branch-graphviz")]
            let mut node_start_order = 0;
            #[cfg(feature = "branch-graphviz")]
            let mut node_finish_order = 0;

            // output errors are ignored, printing must never stop the solver
            while let Ok(UIMessage { thread_id, message }) = receiver.recv() {
                match message {
                    UIUserMessage::NodeCut { node } => {
                        let _ = writeln!(&mut buffered_out, "[{:?}] {:>6.2}  cut node {}", thread_id, start_time.elapsed().as_secs_f64(), node);
                        #[cfg(feature = "branch-graphviz")]
                        if let Some(file) = graphviz_branch_file.as_mut() {
                            let _ = file.write_all(format!("{} [style=\"filled\" fillcolor=\"lightyellow\"];\n", node.0).as_bytes());
                        }
                    }
                    UIUserMessage::TimeLimitReached => {
                        let _ = writeln!(&mut buffered_out, "{}", style("Time Limit Reached").yellow().bold());
                    }
                    UIUserMessage::Log(msg) => {
                        let _ = writeln!(&mut buffered_out, "[{:?}] {:>6.2}  {}", thread_id, start_time.elapsed().as_secs_f64(), msg);
                    }
                    UIUserMessage::LogS(msg) => {
                        let _ = writeln!(&mut buffered_out, "[{:?}] {:>6.2}  {}", thread_id, start_time.elapsed().as_secs_f64(), msg);
                    }
                    UIUserMessage::NumericAnomaly { var, value, bound, violation } => {
                        num_anomalies += 1;
                        let _ = writeln!(&mut buffered_out, "{}", style(format!(
                            "[{:?}] {:>6.2}  clamped {var}={value} to bound {bound} (violation {violation:e})",
                            thread_id, start_time.elapsed().as_secs_f64()
                        )).yellow());
                    }
                    UIUserMessage::Branched { var, value, block, children } => {
                        let _ = writeln!(&mut buffered_out, "[{:?}] {:>6.2}  branched on {}={:.4} (block {}) into {} children",
                            thread_id,
                            start_time.elapsed().as_secs_f64(),
                            var,
                            value,
                            block.map_or_else(|| "-".to_string(), |b| b.to_string()),
                            children
                        );
                    }

                    UIUserMessage::StartPhase(title, level) => {
                        let width = 30usize.saturating_sub(4 * usize::from(level)).max(10);
                        let _ = writeln!(&mut buffered_out, "{}", pad_str_with(&format!("{thread_id:?}"), width, Alignment::Center, None, '⎯'));
                        let _ = writeln!(&mut buffered_out, "{}", style(pad_str(title, width, Alignment::Center, None)).green());
                        let _ = writeln!(&mut buffered_out, "{}", "⎯".repeat(width));
                        let _ = buffered_out.flush();
                    }
                    UIUserMessage::ExitUi { root_node } => {

                        let final_time = start_time.elapsed().as_secs_f64();
                        let _ = writeln!(&mut buffered_out, "{}", pad_str_with("Statistics", 30, Alignment::Center, None, '⎯'));
                        let _ = writeln!(&mut buffered_out, "total_lp_time: {total_lp_runtime:>8.2}s / total_pricing_time: {total_pricing_runtime:>8.2}s");

                        let overhead = final_time - total_lp_runtime - total_pricing_runtime;
                        let _ = writeln!(&mut buffered_out, "'overhead': {:>8.2}s  ({:>3.1}%)", overhead, overhead / final_time.max(f64::EPSILON) * 100.0);
                        if let Some(root) = root_node {
                            let _ = writeln!(&mut buffered_out, "root node: {:>8.2}s", root.as_secs_f64());
                        }
                        if num_anomalies > 0 {
                            let _ = writeln!(&mut buffered_out, "{}", style(format!("{num_anomalies} numeric anomalies clamped")).dim());
                        }
                        let _ = writeln!(&mut buffered_out, "{:>3.1}% spent in pricing vs lp",
                            total_pricing_runtime / (total_lp_runtime + total_pricing_runtime).max(f64::EPSILON) * 100.0);
                        let _ = writeln!(&mut buffered_out, "{}", "⎯".repeat(30));

                        let _ = buffered_out.flush();

                        break
                    }

                    UIUserMessage::NodeStart(node_state) => {
                        let _ = writeln!(&mut buffered_out, "[{t:?}] {time:>6.2} started   node {node}",
                            t = thread_id,
                            time = start_time.elapsed().as_secs_f64(),
                            node = node_state
                        );
                        let _ = buffered_out.flush();

                        #[cfg(feature = "branch-graphviz")]
                        {
                            node_start_order += 1;
                        }

                        #[cfg(feature = "branch-graphviz")]
                        if let Some(file) = graphviz_branch_file.as_mut() {
                            let _ = file.write_all(format!("{id} [shape=\"plaintext\" label=<<TABLE BORDER=\"0\" CELLBORDER=\"1\" CELLSPACING=\"0\"><TR><TD>{id}</TD><TD>s#{node_start_order}</TD><TD>{before_obj:.2} → ?</TD><TD>{best_obj:.2}</TD></TR><TR><TD>d:{depth}</TD><TD COLSPAN=\"3\">{last_bound}</TD></TR></TABLE>>];\n {parent} -> {id};\n",
                                id = node_state.node.0,
                                parent = node_state.parent.map_or(node_state.node.0, |p| p.0),
                                before_obj = node_state.before_obj,
                                best_obj = node_state.best_obj,
                                last_bound = node_state.last_bound,
                                depth = node_state.depth,
                            ).as_bytes());
                        }
                    }
                    UIUserMessage::NodeFinish(node_state) => {

                        let _ = writeln!(&mut buffered_out, "[{t:?}] {time:>6.2} completed node {node}",
                            t = thread_id,
                            time = start_time.elapsed().as_secs_f64(),
                            node = node_state
                        );

                        #[cfg(feature = "branch-graphviz")]
                        {
                            node_finish_order += 1;
                        }

                        #[cfg(feature = "branch-graphviz")]
                        if let Some(file) = graphviz_branch_file.as_mut() {
                            let _ = file.write_all(format!("{id} [shape=\"plaintext\" label=<<TABLE BORDER=\"0\" CELLBORDER=\"1\" CELLSPACING=\"0\"><TR><TD>{id}</TD><TD>#{node_finish_order}</TD><TD>{before_obj:.5} → {after_obj}</TD><TD>{best_obj:.2}</TD></TR><TR><TD>d:{depth}</TD><TD COLSPAN=\"3\">{last_bound}</TD></TR></TABLE>>];\n",
                                id = node_state.node.0,
                                before_obj = node_state.before_obj,
                                after_obj = node_state.after_obj.map_or_else(|| "-".to_string(), |v| format!("{v:.5}")),
                                last_bound = node_state.last_bound,
                                best_obj = node_state.best_obj,
                                depth = node_state.depth,
                            ).as_bytes());
                        }
                    }

                    UIUserMessage::LPSolveIterationFinish(state) => {
                        total_lp_runtime += state.lp_runtime;

                        let _ = writeln!(&mut buffered_out, "{}", style(format!("[{t:?}] {time:>6.2} lp iteration {state}",
                            t = thread_id,
                            time = start_time.elapsed().as_secs_f64(),
                            state = state
                        )).dim());
                    }
                    UIUserMessage::PricingProblemFinish(state) => {

                        // always needed for statistics
                        total_pricing_runtime += state.runtime;

                        let _ = writeln!(&mut buffered_out, "{}", style(format!("[{t:?}] {time:>6.2} pricing iteration {state}",
                            t = thread_id,
                            time = start_time.elapsed().as_secs_f64(),
                            state = state
                        )).dim());
                    }

                    UIUserMessage::NewBest { node, obj } => {

                        let _ = writeln!(&mut buffered_out, "[{:?}] {:>6.2}  {} {} at node {}", thread_id, start_time.elapsed().as_secs_f64(), style("Has new best:").black().on_green().bold(), style(obj.to_string()).bold(), node);
                        let _ = buffered_out.flush();

                        #[cfg(feature = "branch-graphviz")]
                        if let Some(file) = graphviz_branch_file.as_mut() {
                            let _ = file.write_all(format!("{id} [style=\"filled\" fillcolor=\"lightgreen\"];\n", id = node.0).as_bytes());
                        }
                    }
                }
            }

            #[cfg(feature = "branch-graphviz")]
            if let Some(file) = graphviz_branch_file.as_mut() {
                let _ = file.write_all(b"}\n");
            }

            let _ = buffered_out.flush();
        }));

        #[cfg(feature = "disable_ui")]
        let printer = {
            drop(receiver);
            None
        };

        Self {
            sender: UISender { sender },
            printer,
        }
    }
}

impl Default for UI {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct NodeUIState {
    pub node: NodeHandle,
    pub parent: Option<NodeHandle>,
    pub depth: u32,
    pub num_columns: usize,
    pub current_open: usize,
    pub last_bound: String,
    pub special: String,
    pub before_obj: f64,
    pub after_obj: Option<f64>, // not set in node start
    pub best_obj: f64,
}

impl Display for NodeUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{id}  parent=<{parent}> depth=<{depth}> open=<{current_open}> cols=<{num_columns}> last=<{last_bound}> {special} obj_before=<{before_obj}> obj_now=<{after_obj}> obj*=<{best_obj}>",
            id = self.node,
            parent = self.parent.map_or_else(|| "-".to_string(), |p| p.to_string()),
            depth = self.depth,
            current_open = self.current_open,
            num_columns = self.num_columns,
            last_bound = self.last_bound,
            special = self.special,
            before_obj = self.before_obj,
            after_obj = self.after_obj.map_or_else(|| "-".to_string(), |v| format!("{v}")),
            best_obj = self.best_obj,
        )
    }
}

#[derive(Clone, Debug)]
/// Holds all state updates that can influence the UI
pub enum UIUserMessage {
    LogS(&'static str),
    Log(String),
    TimeLimitReached,
    StartPhase(&'static str, u8),
    ExitUi { root_node: Option<Duration> },

    NodeStart(NodeUIState),
    NodeFinish(NodeUIState),
    NodeCut { node: NodeHandle },
    Branched { var: OrigVarId, value: f64, block: Option<usize>, children: usize },

    LPSolveIterationFinish(LPSolveIterationUIState),
    PricingProblemFinish(PricingProblemUIState),

    /// bound violation clamped while bridging a master solution
    NumericAnomaly { var: OrigVarId, value: f64, bound: f64, violation: f64 },

    NewBest { obj: f64, node: NodeHandle },
}

#[derive(Clone, Debug)]
pub struct PricingProblemUIState {
    pub runtime: f64,
    pub num_columns: usize,
    pub dual_bound: f64,
}

impl Display for PricingProblemUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "pricing_runtime=<{:>5.2}> num_cols=<{}> dual_bound=<{}>", self.runtime, self.num_columns, self.dual_bound)
    }
}


#[derive(Clone, Debug)]
pub struct LPSolveIterationUIState {
    pub obj: f64,
    pub best_dual_bound: Option<f64>,
    pub lp_runtime: f64,
    pub num_columns: usize,
    pub num_total_pool_columns: usize,
    pub previous_pricing_runtime: f64,
}

impl Display for LPSolveIterationUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj=<{:>10.8}> bound=<{}>: lp_runtime=<{:>5.2}> prev_pricing_runtime=<{:>5.2}> cols=<{}/{}>",
            self.obj,
            self.best_dual_bound.map_or_else(|| "-".to_string(), |db| format!("{db:>10.8}")),
            self.lp_runtime,
            self.previous_pricing_runtime,
            self.num_columns,
            self.num_total_pool_columns
        )
    }
}


#[derive(Clone, Debug)]
pub struct UIMessage {
    pub thread_id: ThreadId,
    pub message: UIUserMessage,
}
