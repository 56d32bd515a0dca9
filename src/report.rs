use std::fmt::Write;

use crate::mirror::SlotSource;
use crate::models::Storm;
use crate::pipeline::{CycleOutcome, CycleState, StormReport};
use crate::tracks::mean_track;

/// One-line overview of a filtered storm, as printed by `inspect`.
pub fn storm_line(storm: &Storm) -> String {
    let peak = storm
        .peak_wind()
        .map_or_else(|| "n/a".to_string(), |w| format!("{w:.1} m/s"));
    let mean = mean_track(&storm.samples);
    let track = if mean.is_empty() {
        "no mean track".to_string()
    } else {
        format!("mean track {} steps", mean.len())
    };
    format!(
        "- {}: {} samples across {} members, peak wind {}, {}",
        storm.id,
        storm.samples.len(),
        storm.member_count(),
        peak,
        track
    )
}

fn state_label(state: CycleState) -> &'static str {
    match state {
        CycleState::NoData => "no storm in the forecast feed",
        CycleState::NoBasinMatch => "no system inside the basin",
        CycleState::PerStormProcessed => "systems processed",
        CycleState::MirrorUpdated => "mirror updated",
    }
}

fn percent(value: Option<f32>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.0}%"))
}

fn storm_section(output: &mut String, storm: &StormReport) {
    let _ = writeln!(output, "### System {}", storm.id);
    let _ = writeln!(
        output,
        "- {} samples from {} members, mean track {} steps",
        storm.sample_count, storm.member_count, storm.mean_track_len
    );
    if let Some(peak) = storm.peak_wind_ms {
        let _ = writeln!(output, "- Peak wind {peak:.1} m/s");
    }
    if let Some(stats) = storm.strike_stats {
        let _ = writeln!(
            output,
            "- Strike probability: max {}, {} cells with signal ({} of them at 50% or more)",
            percent(stats.max_percent),
            stats.signal_cells,
            percent(stats.share_at_least_50)
        );
    }
    for (label, max) in &storm.window_maxima {
        let _ = writeln!(output, "- Window {label}: domain max {}", percent(*max));
    }
    for path in storm.artifacts.values() {
        let _ = writeln!(output, "- Wrote {}", path.display());
    }
    for gap in &storm.gaps {
        let _ = writeln!(output, "- Skipped: {gap}");
    }
}

pub fn build_summary(outcome: &CycleOutcome) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Five-Day Cyclogenesis Products");
    let _ = writeln!(
        output,
        "Run {} (cycle {}), {}",
        outcome.run_date.format("%Y-%m-%d %H:%M"),
        outcome.cycle_start.format("%Y-%m-%d %H:%M"),
        state_label(outcome.terminal_data_state())
    );
    let _ = writeln!(output, "Run id: {}", outcome.run_id);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Systems");

    if outcome.storms.is_empty() {
        let _ = writeln!(output, "No system tracked for this cycle.");
    } else {
        for storm in &outcome.storms {
            storm_section(&mut output, storm);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Mirror");
    match &outcome.primary {
        Some(id) => {
            let _ = writeln!(output, "Primary system: {id}");
        }
        None => {
            let _ = writeln!(output, "No primary system ({}).", outcome.subtitle);
        }
    }
    for (slot, source) in &outcome.mirror {
        let origin = match source {
            SlotSource::Copied { from } => format!("copied from {}", from.display()),
            SlotSource::Placeholder => "placeholder".to_string(),
        };
        let _ = writeln!(output, "- {}: {}", slot.file_name(), origin);
    }

    output
}
