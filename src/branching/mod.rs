//! Branching on the master problem.
//!
//! `chain` keeps the tree of branching decisions, `activation` decides
//! which master columns enter a decision's row and `generic` is the
//! Vanderbeck branching rule producing those decisions.

use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::error::{BnpError, BnpResult};
use crate::master_problem::MasterSolution;
use crate::misc::{DecisionId, NodeHandle, OrigVarId};
use crate::session::Session;
use crate::ui::UIUserMessage;
use crate::EPSILON;

pub mod activation;
pub mod chain;
pub mod direct;
pub mod generic;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundSense {
    GreaterEqual,
    Less,
}

impl Display for BoundSense {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundSense::GreaterEqual => write!(f, ">="),
            BoundSense::Less => write!(f, "<"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// One threshold condition `generator[position] (>= | <) threshold`
pub struct ComponentBound {
    pub position: usize,
    pub sense: BoundSense,
    pub threshold: f64,
}

impl ComponentBound {
    pub fn new(position: usize, sense: BoundSense, threshold: f64) -> Self {
        Self { position, sense, threshold }
    }

    /// Exactly one of the two senses holds for any value
    #[inline]
    pub fn holds(&self, value: f64) -> bool {
        match self.sense {
            BoundSense::GreaterEqual => value >= self.threshold - EPSILON,
            BoundSense::Less => value < self.threshold - EPSILON,
        }
    }
}

impl Display for ComponentBound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(g[{}] {} {})", self.position, self.sense, self.threshold)
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Conjunction of component bounds, a half-space in pricing space.
/// Never empty.
pub struct SeparatingSet(Vec<ComponentBound>);

impl SeparatingSet {
    pub fn new(bounds: Vec<ComponentBound>) -> BnpResult<Self> {
        if bounds.is_empty() {
            return Err(BnpError::InvalidBranchingData("separating set without component bounds".to_string()));
        }
        if let Some(b) = bounds.iter().find(|b| !b.threshold.is_finite()) {
            return Err(BnpError::InvalidBranchingData(format!("non-finite threshold in {b}")));
        }
        Ok(Self(bounds))
    }

    pub fn bounds(&self) -> &[ComponentBound] {
        &self.0
    }

    /// A generator is in S iff every component bound holds
    pub fn contains(&self, value_at: impl Fn(usize) -> f64) -> bool {
        self.0.iter().all(|b| b.holds(value_at(b.position)))
    }

    /// Membership of a dense generator
    pub fn contains_dense(&self, values: &[f64]) -> bool {
        self.contains(|p| values.get(p).copied().unwrap_or(0.0))
    }
}

impl Display for SeparatingSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.iter().join(" & "))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OrigBound {
    Lower(f64),
    Upper(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// Original-problem side of a branching decision: a bound on the
/// variable that was branched on.
pub struct OrigBranchCons {
    pub var: OrigVarId,
    pub bound: OrigBound,
}

impl OrigBranchCons {
    /// Applies the bound to a domain
    pub fn tighten(&self, lb: f64, ub: f64) -> (f64, f64) {
        match self.bound {
            OrigBound::Lower(v) => (lb.max(v), ub),
            OrigBound::Upper(v) => (lb, ub.min(v)),
        }
    }
}

impl Display for OrigBranchCons {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.bound {
            OrigBound::Lower(v) => write!(f, "{} >= {}", self.var, v),
            OrigBound::Upper(v) => write!(f, "{} <= {}", self.var, v),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Constraint a branching rule attaches to a child node
pub enum NodeConstraint {
    MasterBranch(DecisionId),
    OrigBound(OrigBranchCons),
}

/// Host search tree as seen by the branching rules.
/// Children are always created below the node currently processed.
pub trait SearchTree {
    fn create_child_node(&mut self, estimate: f64) -> NodeHandle;
    fn add_constraint_to_node(&mut self, node: NodeHandle, cons: NodeConstraint);
}

#[derive(Clone, Debug, PartialEq)]
pub enum BranchOutcome {
    /// children were created, with the decision node each activates
    Branched { children: Vec<(NodeHandle, DecisionId)> },
    /// the rule had nothing to branch on
    DidNotFind,
}

/// A branching rule of the master problem
pub trait BranchingRule {
    fn name(&self) -> &'static str;

    /// rules are tried in descending priority
    fn priority(&self) -> i32;

    /// Branch on the fractional master LP solution
    fn exec_lp(&mut self, session: &mut Session, master_sol: &MasterSolution, tree: &mut dyn SearchTree) -> BnpResult<BranchOutcome>;

    /// Branch on a pseudo solution (original values without an LP)
    fn exec_ps(&mut self, _session: &mut Session, _orig_values: &[f64], _tree: &mut dyn SearchTree) -> BnpResult<BranchOutcome> {
        Err(BnpError::BranchingNotApplicable(format!("{} has no pseudo solution branching", self.name())))
    }
}

/// Branching rules ordered by priority
#[derive(Default)]
pub struct BranchingRuleSet {
    rules: Vec<Box<dyn BranchingRule>>,
}

impl BranchingRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule set holding only the generic branching rule
    pub fn with_generic() -> Self {
        let mut set = Self::new();
        set.add(Box::new(generic::GenericBranching::new()));
        set
    }

    /// Generic branching on block variables, direct copy branching for
    /// the master-only and linking variables
    pub fn default_rules() -> Self {
        let mut set = Self::with_generic();
        set.add(Box::new(direct::DirectCopyBranching::new()));
        set
    }

    pub fn add(&mut self, rule: Box<dyn BranchingRule>) {
        self.rules.push(rule);
        // stable, equal priorities keep insertion order
        self.rules.sort_by_key(|r| std::cmp::Reverse(r.priority()));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Tries the rules in order until one branches.
    /// Declining rules are skipped silently, other errors abort.
    pub fn exec_lp(&mut self, session: &mut Session, master_sol: &MasterSolution, tree: &mut dyn SearchTree) -> BnpResult<BranchOutcome> {
        for rule in &mut self.rules {
            match rule.exec_lp(session, master_sol, tree) {
                Ok(BranchOutcome::DidNotFind) => continue,
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_decline() => {
                    session.ui().send(UIUserMessage::Log(format!("{} declined: {e}", rule.name())));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(BranchOutcome::DidNotFind)
    }

    pub fn exec_ps(&mut self, session: &mut Session, orig_values: &[f64], tree: &mut dyn SearchTree) -> BnpResult<BranchOutcome> {
        for rule in &mut self.rules {
            match rule.exec_ps(session, orig_values, tree) {
                Ok(BranchOutcome::DidNotFind) => continue,
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_decline() => {
                    session.ui().send(UIUserMessage::Log(format!("{} declined: {e}", rule.name())));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(BranchOutcome::DidNotFind)
    }
}
