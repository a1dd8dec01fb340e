//! UI rendering and layout utilities

use crate::constants::audio::MIN_DB_LEVEL;
use crate::mixer::{self, MixerTarget};
use crate::state::EngineSnapshot;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
};

/// Application state for UI rendering
pub struct UiState<'a> {
    pub device_name: &'a str,
    pub status: &'a str,
    pub snapshot: &'a EngineSnapshot,
    pub threshold_db: f64,
    pub db_correction: f64,
    pub target: MixerTarget,
}

/// Signed, zero-padded level, e.g. `-05.0`
pub fn format_db(db: f64) -> String {
    format!("{:+05.1}", db)
}

/// One-line summary of the read surface, also used by the headless runner
pub fn status_line(snapshot: &EngineSnapshot) -> String {
    let mut line = format!(
        "Current: {} dB | Average: {} dB | Fade active: {} | Next check in: {} s",
        format_db(snapshot.instant_db),
        format_db(snapshot.average_db),
        if snapshot.fade_active { "Y" } else { "N" },
        snapshot.seconds_until_next_evaluation
    );
    if let Some(command) = snapshot.pending_fade {
        line.push_str(&format!(
            " | Fading {} dB over {} s",
            command.delta,
            command.duration_ms / 1000
        ));
    }
    if !snapshot.running {
        line.push_str(" | stopped");
    }
    line
}

/// Plot points for a history, x in seconds relative to now (`-len..-1`)
pub fn chart_points(values: &[f64]) -> Vec<(f64, f64)> {
    let len = values.len() as f64;
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64 - len, v))
        .collect()
}

/// Minute labels for the time axis
fn time_labels(plot_length: usize) -> Vec<Span<'static>> {
    let minutes = plot_length as f64 / 60.0;
    vec![
        Span::raw(format!("-{:.1}m", minutes)),
        Span::raw(format!("-{:.1}m", minutes / 2.0)),
        Span::raw("now"),
    ]
}

fn level_color(db: f64, threshold_db: f64) -> Color {
    if db > threshold_db {
        Color::Red
    } else if db > threshold_db - 10.0 {
        Color::Yellow
    } else {
        Color::Green
    }
}

/// Render the complete UI
pub fn render_ui(f: &mut Frame, state: &UiState) {
    let size = f.size();
    let snapshot = state.snapshot;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(8),
        ])
        .split(size);

    // Device and status
    let device_block = Block::default().title("Device").borders(Borders::ALL);
    let device_text = Paragraph::new(state.device_name).block(device_block);
    f.render_widget(device_text, chunks[0]);

    let mut lines = vec![
        Line::from(vec![
            Span::raw("Current: "),
            Span::styled(
                format!("{} dB", format_db(snapshot.instant_db)),
                Style::default().fg(level_color(snapshot.instant_db, state.threshold_db)),
            ),
            Span::raw("   Average: "),
            Span::styled(
                format!("{} dB", format_db(snapshot.average_db)),
                Style::default().fg(level_color(snapshot.average_db, state.threshold_db)),
            ),
        ]),
        Line::from(format!(
            "Fade active: {}   Next check in: {} s   Target: {}",
            if snapshot.fade_active { "Y" } else { "N" },
            snapshot.seconds_until_next_evaluation,
            state.target
        )),
    ];
    if let Some((target, command)) = snapshot.last_command {
        lines.push(Line::from(format!("Last command: {}", mixer::script_line(target, command))));
    }
    match &snapshot.last_error {
        Some(error) => lines.push(Line::styled(error.clone(), Style::default().fg(Color::Red))),
        None => lines.push(Line::from(state.status)),
    }
    let status_block = Block::default().title("Status").borders(Borders::ALL);
    f.render_widget(Paragraph::new(lines).block(status_block), chunks[1]);

    // History chart
    let plot_length = snapshot.instant.len().max(1);
    let instant = chart_points(&snapshot.instant);
    let average = chart_points(&snapshot.average);
    let x_min = -(plot_length as f64);
    let threshold = vec![(x_min, state.threshold_db), (-1.0, state.threshold_db)];
    let y_max = state.db_correction.max(MIN_DB_LEVEL + 1.0);

    let datasets = vec![
        Dataset::default()
            .name("instant")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Cyan))
            .data(&instant),
        Dataset::default()
            .name("average")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Yellow))
            .data(&average),
        Dataset::default()
            .name("threshold")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Red))
            .data(&threshold),
    ];

    let chart = Chart::new(datasets)
        .block(Block::default().title("Level history (dBFS)").borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .bounds([x_min, -1.0])
                .labels(time_labels(plot_length)),
        )
        .y_axis(
            Axis::default()
                .bounds([MIN_DB_LEVEL, y_max])
                .labels(vec![
                    Span::raw(format!("{:.0}", MIN_DB_LEVEL)),
                    Span::raw(format!("{:.0}", (MIN_DB_LEVEL + y_max) / 2.0)),
                    Span::raw(format!("{:.0}", y_max)),
                ]),
        );
    f.render_widget(chart, chunks[2]);
}
