//! Threshold regression suite for the difference evaluator.
//!
//! Synthetic cases always run. Screenshot pairs are picked up from
//! `fixtures/vision/<case>/{before,after}.png` (or `$VISION_FIXTURES`): a case
//! whose name ends in `-placed` must confirm a placement, one ending in
//! `-idle` must not confirm a selection.

mod common;

use std::path::{Path, PathBuf};

use libtest_mimic::{Arguments, Failed, Trial};

use autopop_core::confirm::{ConfirmationSpec, DEFAULT_PLACEMENT_THRESHOLD, DEFAULT_SELECTION_THRESHOLD};
use autopop_core::types::{Capture, Point, Region};
use autopop_core::vision::DifferenceEvaluator;

/// Repaint the first `fraction` of the rows with a new colour.
fn partly_repainted(region: Region, fraction: f64) -> (Capture, Capture) {
    let before = Capture::filled(region, [40, 90, 30, 255]);
    let mut after = Capture::filled(region, [40, 90, 30, 255]);
    let rows = (after.height as f64 * fraction).round() as u32;
    for y in 0..rows {
        for x in 0..after.width {
            after.set_bgr(x, y, (200, 200, 220));
        }
    }
    (before, after)
}

fn synthetic(name: &str, fraction: f64, spec: ConfirmationSpec, expect: bool) -> Trial {
    Trial::test(name, move || {
        let region = spec.regions[0];
        let (before, after) = partly_repainted(region, fraction);
        let score = DifferenceEvaluator::default().score(&before, &after)?;
        let verdict = spec.decide(&[score]);
        if verdict.confirmed != expect {
            return Err(format!("score {} against {:.0}%: confirmed={}", score, spec.threshold * 100.0, verdict.confirmed).into());
        }
        Ok(())
    })
}

fn synthetic_trials() -> Vec<Trial> {
    let select = || ConfirmationSpec::selection(Point::new(500, 400), 50, 50, DEFAULT_SELECTION_THRESHOLD);
    let place = || ConfirmationSpec::placement(vec![Region::new(35, 65, 415, 940)], DEFAULT_PLACEMENT_THRESHOLD);
    vec![
        synthetic("selection/no_change", 0.0, select(), false),
        synthetic("selection/ring_only", 0.2, select(), false),
        synthetic("selection/panel_opened", 0.6, select(), true),
        synthetic("placement/partial_redraw", 0.5, place(), false),
        synthetic("placement/panel_swapped", 0.95, place(), true),
        Trial::test("noise/below_floor_is_unchanged", || {
            let region = Region::from_size(0, 0, 64, 64);
            let before = Capture::filled(region, [100, 100, 100, 255]);
            let after = Capture::filled(region, [110, 95, 108, 255]);
            let score = DifferenceEvaluator::default().score(&before, &after)?;
            if score.fraction() != 0.0 {
                return Err(format!("expected 0%, got {}", score).into());
            }
            Ok(())
        }),
    ]
}

fn fixture_trial(dir: PathBuf) -> Option<Trial> {
    let name = dir.file_name()?.to_string_lossy().to_string();
    let expect = if name.ends_with("-placed") {
        ConfirmationSpec::placement(Vec::new(), DEFAULT_PLACEMENT_THRESHOLD)
    } else if name.ends_with("-idle") {
        ConfirmationSpec::selection(Point::new(0, 0), 1, 1, DEFAULT_SELECTION_THRESHOLD)
    } else {
        return None;
    };
    let confirm = name.ends_with("-placed");
    Some(Trial::test(format!("fixture/{}", name), move || {
        let before = common::load_capture(&dir.join("before.png")).map_err(|e| format!("{:#}", e))?;
        let after = common::load_capture(&dir.join("after.png")).map_err(|e| format!("{:#}", e))?;
        let score = DifferenceEvaluator::default().score(&before, &after)?;
        if expect.confirms(score) != confirm {
            return Err(Failed::from(format!("{} scored {}", name, score)));
        }
        Ok(())
    }))
}

fn fixture_trials(root: &Path) -> Vec<Trial> {
    let Ok(entries) = std::fs::read_dir(root) else { return Vec::new() };
    let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
    dirs.sort();
    dirs.into_iter().filter_map(fixture_trial).collect()
}

fn main() {
    let args = Arguments::from_args();
    let root = std::env::var_os("VISION_FIXTURES")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/vision"));

    let mut trials = synthetic_trials();
    trials.extend(fixture_trials(&root));
    libtest_mimic::run(&args, trials).exit();
}
