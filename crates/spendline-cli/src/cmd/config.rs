//! `spendline config` - show the effective configuration

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::config::Config;

pub fn format_table(config: &Config) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let api = &config.api;
    let rows = [
        ("API root", api.base_url.clone()),
        ("Max requests/s", api.max_rps.to_string()),
        (
            "User agent",
            api.user_agent.clone().unwrap_or_else(|| "(default)".into()),
        ),
        ("Transport retry budget", format!("{}s", api.retry_budget_secs)),
        ("Probe budget", format!("{}s", config.download.probe_budget_secs)),
        ("Read timeout", format!("{}s", config.download.read_timeout_secs)),
        ("Poll interval", format!("{}s", config.bulk.poll_interval_secs)),
        ("Exception threshold", config.bulk.exception_threshold.to_string()),
        ("Min split days", config.bulk.min_split_days.to_string()),
        (
            "Bulk format",
            format!("{} ({})", config.bulk.file_format, config.bulk.date_type),
        ),
        (
            "Incremental",
            format!(
                "{}-day shards, {}",
                config.incremental.chunk_days, config.incremental.format
            ),
        ),
        ("Output directory", config.output.default_dir.display().to_string()),
        ("Compression level", config.output.compression_level.to_string()),
        ("Dedup keys", config.output.dedup_keys.join(", ")),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }

    format!("\n{table}")
}

pub fn run(config: &Config) {
    eprintln!("{}", format_table(config));
}
