use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::strategy::{Action, Operation};
use crate::types::{Point, Region};
use crate::vision::DifferenceScore;

pub const DEFAULT_SELECTION_THRESHOLD: f64 = 0.40;
pub const DEFAULT_PLACEMENT_THRESHOLD: f64 = 0.85;

/// Which way the score has to move for the action to count as done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    #[default]
    MustExceed,
    MustBeBelow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmKind {
    Selection,
    Placement,
    Custom(String),
}

impl fmt::Display for ConfirmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmKind::Selection => write!(f, "selection"),
            ConfirmKind::Placement => write!(f, "placement"),
            ConfirmKind::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// What "the action had its effect" looks like on screen.
///
/// Confirmed when any candidate region satisfies the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationSpec {
    pub kind: ConfirmKind,
    pub regions: Vec<Region>,
    pub threshold: f64,
    pub polarity: Polarity,
}

/// Result of applying a spec to the per-region scores of one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub confirmed: bool,
    /// Score of the deciding region, or the closest miss.
    pub score: DifferenceScore,
    pub region_index: Option<usize>,
}

impl ConfirmationSpec {
    pub fn selection(center: Point, half_w: i32, half_h: i32, threshold: f64) -> Self {
        Self {
            kind: ConfirmKind::Selection,
            regions: vec![Region::centered(center, half_w, half_h)],
            threshold,
            polarity: Polarity::MustExceed,
        }
    }

    pub fn placement(panels: Vec<Region>, threshold: f64) -> Self {
        Self {
            kind: ConfirmKind::Placement,
            regions: panels,
            threshold,
            polarity: Polarity::MustExceed,
        }
    }

    /// The policy proper: a pure function of one score.
    ///
    /// A zero score never confirms a change, whatever the threshold.
    pub fn confirms(&self, score: DifferenceScore) -> bool {
        match self.polarity {
            Polarity::MustExceed => score.fraction() > 0.0 && score.fraction() >= self.threshold,
            Polarity::MustBeBelow => score.fraction() < self.threshold,
        }
    }

    pub fn decide(&self, scores: &[DifferenceScore]) -> Verdict {
        if let Some((i, s)) = scores.iter().enumerate().find(|(_, s)| self.confirms(**s)) {
            return Verdict { confirmed: true, score: *s, region_index: Some(i) };
        }
        let closest = match self.polarity {
            Polarity::MustExceed => scores.iter().copied().fold(None, |best: Option<DifferenceScore>, s| {
                Some(best.map_or(s, |b| if s > b { s } else { b }))
            }),
            Polarity::MustBeBelow => scores.iter().copied().fold(None, |best: Option<DifferenceScore>, s| {
                Some(best.map_or(s, |b| if s < b { s } else { b }))
            }),
        };
        Verdict {
            confirmed: false,
            score: closest.unwrap_or(DifferenceScore::ZERO),
            region_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSettings {
    pub threshold: f64,
    pub half_width: i32,
    pub half_height: i32,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self { threshold: DEFAULT_SELECTION_THRESHOLD, half_width: 105, half_height: 75 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementSettings {
    pub threshold: f64,
    /// Left and right tower panels; which one opens depends on where the
    /// tower sits on the map.
    pub panels: Vec<Region>,
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_PLACEMENT_THRESHOLD,
            panels: vec![Region::new(35, 65, 415, 940), Region::new(1260, 60, 1635, 940)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomConfirmation {
    pub regions: Vec<Region>,
    pub threshold: f64,
    #[serde(default)]
    pub polarity: Polarity,
}

/// Every confirmation the executor can hand to the retry loop, keyed by
/// operation or by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmCatalog {
    pub noise_floor: u8,
    pub selection: SelectionSettings,
    pub placement: PlacementSettings,
    pub custom: BTreeMap<String, CustomConfirmation>,
}

impl Default for ConfirmCatalog {
    fn default() -> Self {
        let mut custom = BTreeMap::new();
        // ability bar, bottom-left of the HUD
        custom.insert(
            "ability".to_string(),
            CustomConfirmation {
                regions: vec![Region::new(40, 950, 700, 1040)],
                threshold: DEFAULT_SELECTION_THRESHOLD,
                polarity: Polarity::MustExceed,
            },
        );
        Self {
            noise_floor: crate::vision::DEFAULT_NOISE_FLOOR,
            selection: SelectionSettings::default(),
            placement: PlacementSettings::default(),
            custom,
        }
    }
}

impl ConfirmCatalog {
    pub fn custom(&self, name: &str) -> Option<ConfirmationSpec> {
        self.custom.get(name).map(|c| ConfirmationSpec {
            kind: ConfirmKind::Custom(name.to_string()),
            regions: c.regions.clone(),
            threshold: c.threshold,
            polarity: c.polarity,
        })
    }

    /// Build the spec for one action at dispatch time.
    ///
    /// Buys confirm on the selection region around the click point, upgrades
    /// on the tower panels, abilities on the `ability` custom spec unless
    /// they name another one.
    pub fn spec_for(&self, action: &Action) -> Result<ConfirmationSpec, String> {
        if let Some(name) = &action.confirm {
            return self
                .custom(name)
                .ok_or_else(|| format!("step {}: unknown confirmation '{}'", action.step, name));
        }
        match action.operation {
            Operation::Buy => {
                let pos = action
                    .position
                    .ok_or_else(|| format!("step {}: buy without a position", action.step))?;
                Ok(ConfirmationSpec::selection(
                    pos,
                    self.selection.half_width,
                    self.selection.half_height,
                    self.selection.threshold,
                ))
            }
            Operation::Upgrade => Ok(ConfirmationSpec::placement(
                self.placement.panels.clone(),
                self.placement.threshold,
            )),
            Operation::Ability => match (self.custom("ability"), action.position) {
                (Some(spec), _) => Ok(spec),
                (None, Some(pos)) => Ok(ConfirmationSpec::selection(
                    pos,
                    self.selection.half_width,
                    self.selection.half_height,
                    self.selection.threshold,
                )),
                (None, None) => Err(format!(
                    "step {}: ability has no position and no 'ability' confirmation is configured",
                    action.step
                )),
            },
        }
    }
}
