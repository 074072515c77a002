use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::strategy::{Action, Operation};
use crate::types::Point;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputFault {
    #[error("click at {0} failed: {1}")]
    Click(Point, String),
    #[error("key '{0}' failed: {1}")]
    Key(String, String),
    #[error("game window is gone")]
    WindowLost,
}

/// One primitive input event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputStep {
    Tap(String),
    Click(Point),
}

/// Everything the input collaborator needs to perform one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    pub operation: Operation,
    pub target: String,
    pub position: Option<Point>,
    pub keys: Vec<String>,
}

impl InputRequest {
    /// Concrete event order per operation.
    ///
    /// Buy: select the tower by hotkey, then click the placement point.
    /// Upgrade: click the tower to open its panel, then press the path keys.
    /// Ability: press the ability key, then click if it is targeted.
    pub fn steps(&self) -> Vec<InputStep> {
        let taps = self.keys.iter().cloned().map(InputStep::Tap);
        let click = self.position.map(InputStep::Click);
        match self.operation {
            Operation::Buy | Operation::Ability => taps.chain(click).collect(),
            Operation::Upgrade => click.into_iter().chain(taps).collect(),
        }
    }
}

/// Performs simulated input against the game. Blocking.
pub trait InputSimulator {
    fn invoke(&mut self, request: &InputRequest) -> Result<(), InputFault>;
}

/// Keys for towers, the hero, and the three upgrade paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyTable {
    pub towers: BTreeMap<String, String>,
    pub default_tower: String,
    pub hero: String,
    pub upgrades: [String; 3],
}

impl Default for HotkeyTable {
    fn default() -> Self {
        let towers = [
            ("Dart Monkey", "q"),
            ("Boomerang Monkey", "w"),
            ("Bomb Shooter", "e"),
            ("Tack Shooter", "r"),
            ("Ice Monkey", "t"),
            ("Glue Gunner", "y"),
            ("Sniper Monkey", "z"),
            ("Monkey Sub", "x"),
            ("Monkey Buccaneer", "c"),
            ("Monkey Ace", "v"),
            ("Heli Pilot", "b"),
            ("Mortar Monkey", "n"),
            ("Dartling Gunner", "m"),
            ("Wizard Monkey", "a"),
            ("Super Monkey", "s"),
            ("Ninja Monkey", "d"),
            ("Alchemist", "f"),
            ("Druid", "g"),
            ("Banana Farm", "h"),
            ("Spike Factory", "j"),
            ("Monkey Village", "k"),
            ("Engineer Monkey", "l"),
        ]
        .into_iter()
        .map(|(n, k)| (n.to_string(), k.to_string()))
        .collect();
        Self {
            towers,
            default_tower: "q".into(),
            hero: "u".into(),
            upgrades: [",".into(), ".".into(), "/".into()],
        }
    }
}

fn suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+\d+$").unwrap())
}

/// "Dart Monkey 01" -> "Dart Monkey"
pub fn tower_name(target: &str) -> &str {
    let trimmed = target.trim();
    match suffix_re().find(trimmed) {
        Some(m) => trimmed[..m.start()].trim_end(),
        None => trimmed,
    }
}

impl HotkeyTable {
    pub fn key_for(&self, action: &Action) -> String {
        if let Some(k) = &action.hotkey {
            return k.clone();
        }
        if action.hero {
            return self.hero.clone();
        }
        self.towers
            .get(tower_name(&action.target))
            .cloned()
            .unwrap_or_else(|| self.default_tower.clone())
    }
}

/// Current upgrade tiers per placed tower.
///
/// Tiers only move up, and only after the executor confirms the upgrade.
#[derive(Debug, Default, Clone)]
pub struct UpgradeLedger {
    tiers: HashMap<String, [u8; 3]>,
}

impl UpgradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tiers(&self, target: &str) -> [u8; 3] {
        self.tiers.get(target).copied().unwrap_or([0, 0, 0])
    }

    /// Path keys to press to bring `action.target` up to the requested tiers.
    /// A requested tier at or below the current one contributes nothing.
    pub fn keys_for(&self, action: &Action, hotkeys: &HotkeyTable) -> Vec<String> {
        let current = self.tiers(&action.target);
        let mut keys = Vec::new();
        for path in 0..3 {
            let missing = action.upgrade_path[path].saturating_sub(current[path]);
            for _ in 0..missing {
                keys.push(hotkeys.upgrades[path].clone());
            }
        }
        keys
    }

    pub fn commit(&mut self, action: &Action) {
        let entry = self.tiers.entry(action.target.clone()).or_insert([0, 0, 0]);
        for path in 0..3 {
            entry[path] = entry[path].max(action.upgrade_path[path]);
        }
    }

    /// Build the input request for `action` against the current ledger.
    pub fn request_for(&self, action: &Action, hotkeys: &HotkeyTable) -> InputRequest {
        let keys = match action.operation {
            Operation::Upgrade => self.keys_for(action, hotkeys),
            Operation::Buy | Operation::Ability => vec![hotkeys.key_for(action)],
        };
        InputRequest {
            operation: action.operation,
            target: action.target.clone(),
            position: action.position,
            keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Trigger;

    fn upgrade(path: [u8; 3]) -> Action {
        Action {
            step: 1,
            trigger: Trigger::AtMoney(0),
            operation: Operation::Upgrade,
            target: "Dart Monkey 01".into(),
            position: Some(Point::new(440, 355)),
            hotkey: None,
            upgrade_path: path,
            confirm: None,
            hero: false,
        }
    }

    #[test]
    fn numeric_suffix_is_stripped() {
        assert_eq!(tower_name("Dart Monkey 01"), "Dart Monkey");
        assert_eq!(tower_name("  Ninja Monkey 2 "), "Ninja Monkey");
        assert_eq!(tower_name("Alchemist"), "Alchemist");
    }

    #[test]
    fn hotkey_resolution_order() {
        let table = HotkeyTable::default();
        let mut a = upgrade([0, 0, 0]);
        a.operation = Operation::Buy;
        assert_eq!(table.key_for(&a), "q");
        a.target = "Wizard Monkey 03".into();
        assert_eq!(table.key_for(&a), "a");
        a.target = "Unknown Thing".into();
        assert_eq!(table.key_for(&a), "q");
        a.hero = true;
        assert_eq!(table.key_for(&a), "u");
        a.hotkey = Some("p".into());
        assert_eq!(table.key_for(&a), "p");
    }

    #[test]
    fn ledger_tracks_tiers_across_upgrades() {
        let table = HotkeyTable::default();
        let mut ledger = UpgradeLedger::new();
        let first = upgrade([1, 0, 0]);
        assert_eq!(ledger.keys_for(&first, &table), vec![","]);
        ledger.commit(&first);
        assert_eq!(ledger.tiers("Dart Monkey 01"), [1, 0, 0]);

        let second = upgrade([2, 0, 0]);
        assert_eq!(ledger.keys_for(&second, &table), vec![","]);
        ledger.commit(&second);
        assert_eq!(ledger.tiers("Dart Monkey 01"), [2, 0, 0]);
    }

    #[test]
    fn ledger_never_downgrades() {
        let table = HotkeyTable::default();
        let mut ledger = UpgradeLedger::new();
        ledger.commit(&upgrade([2, 0, 0]));
        let lower = upgrade([1, 0, 0]);
        assert!(ledger.keys_for(&lower, &table).is_empty());
        ledger.commit(&lower);
        assert_eq!(ledger.tiers("Dart Monkey 01"), [2, 0, 0]);
    }

    #[test]
    fn multiple_paths_in_one_action() {
        let table = HotkeyTable::default();
        let ledger = UpgradeLedger::new();
        let keys = ledger.keys_for(&upgrade([1, 2, 0]), &table);
        assert_eq!(keys, vec![",", ".", "."]);
    }

    #[test]
    fn step_order_depends_on_operation() {
        let table = HotkeyTable::default();
        let ledger = UpgradeLedger::new();
        let up = ledger.request_for(&upgrade([0, 0, 1]), &table);
        assert_eq!(
            up.steps(),
            vec![InputStep::Click(Point::new(440, 355)), InputStep::Tap("/".into())]
        );

        let mut buy = upgrade([0, 0, 0]);
        buy.operation = Operation::Buy;
        let req = ledger.request_for(&buy, &table);
        assert_eq!(
            req.steps(),
            vec![InputStep::Tap("q".into()), InputStep::Click(Point::new(440, 355))]
        );

        let mut ability = upgrade([0, 0, 0]);
        ability.operation = Operation::Ability;
        ability.hotkey = Some("1".into());
        ability.position = None;
        assert_eq!(ledger.request_for(&ability, &table).steps(), vec![InputStep::Tap("1".into())]);
    }
}
