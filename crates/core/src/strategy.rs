use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Point;

/// Sequence index of an action within its strategy.
pub type ActionId = u32;

/// When an action becomes eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    AtMoney(u64),
    NextRound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Buy,
    Upgrade,
    Ability,
}

impl Operation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "place" => Some(Operation::Buy),
            "upgrade" => Some(Operation::Upgrade),
            "ability" => Some(Operation::Ability),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Buy => write!(f, "buy"),
            Operation::Upgrade => write!(f, "upgrade"),
            Operation::Ability => write!(f, "ability"),
        }
    }
}

/// One scheduled game operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub step: ActionId,
    pub trigger: Trigger,
    pub operation: Operation,
    pub target: String,
    pub position: Option<Point>,
    /// Explicit key; otherwise resolved from the hotkey table.
    pub hotkey: Option<String>,
    /// Target tier per upgrade path. Only meaningful for upgrades.
    pub upgrade_path: [u8; 3],
    /// Name of a custom confirmation from settings.
    pub confirm: Option<String>,
    pub hero: bool,
}

impl Action {
    pub fn label(&self) -> String {
        match self.operation {
            Operation::Upgrade => format!(
                "upgrade {} {}-{}-{}",
                self.target, self.upgrade_path[0], self.upgrade_path[1], self.upgrade_path[2]
            ),
            op => format!("{} {}", op, self.target),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("duplicate step {0}")]
    DuplicateStep(ActionId),
    #[error("step {step}: {target} is upgraded before it is bought")]
    UpgradeBeforeBuy { step: ActionId, target: String },
    #[error("step {step}: no position for {target}")]
    MissingPosition { step: ActionId, target: String },
    #[error("step {step}: upgrade tier {tier} out of range 0..=5")]
    TierOutOfRange { step: ActionId, tier: u8 },
}

/// An ordered, validated action list for one map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub description: String,
    pub map: Option<String>,
    pub difficulty: Option<String>,
    pub mode: Option<String>,
    actions: Vec<Action>,
}

impl Strategy {
    /// Sort by step, fill upgrade/ability positions from the matching buy, and
    /// reject lists the executor could never finish.
    pub fn new(name: impl Into<String>, mut actions: Vec<Action>) -> Result<Self, StrategyError> {
        actions.sort_by_key(|a| a.step);

        let mut seen = HashSet::new();
        for a in &actions {
            if !seen.insert(a.step) {
                return Err(StrategyError::DuplicateStep(a.step));
            }
        }

        let mut bought: HashMap<String, Option<Point>> = HashMap::new();
        for a in actions.iter_mut() {
            match a.operation {
                Operation::Buy => {
                    if a.position.is_none() {
                        return Err(StrategyError::MissingPosition { step: a.step, target: a.target.clone() });
                    }
                    bought.insert(a.target.clone(), a.position);
                }
                Operation::Upgrade => {
                    if let Some(&tier) = a.upgrade_path.iter().find(|t| **t > 5) {
                        return Err(StrategyError::TierOutOfRange { step: a.step, tier });
                    }
                    let Some(pos) = bought.get(&a.target) else {
                        return Err(StrategyError::UpgradeBeforeBuy { step: a.step, target: a.target.clone() });
                    };
                    if a.position.is_none() {
                        a.position = *pos;
                    }
                }
                Operation::Ability => {
                    if a.position.is_none() {
                        a.position = bought.get(&a.target).copied().flatten();
                    }
                }
            }
        }

        Ok(Self {
            name: name.into(),
            description: String::new(),
            map: None,
            difficulty: None,
            mode: None,
            actions,
        })
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            map: None,
            difficulty: None,
            mode: None,
            actions: Vec::new(),
        }
    }

    /// Actions in ascending step order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
