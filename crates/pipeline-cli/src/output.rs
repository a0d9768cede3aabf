//! Terminal output formatting.

use colored::{ColoredString, Colorize};
use pipeline_core::analytics::{weighted_value, StageTotals, WinLossSummary};
use pipeline_core::board::{BoardSnapshot, Card, StageKind};
use pipeline_core::format::{format_currency, format_days_in_stage, format_percent};
use pipeline_core::preferences::Preferences;

/// Print the board, one block per column.
pub fn print_board(board: &BoardSnapshot) {
    if board.cards.is_empty() {
        println!(
            "{}",
            "No cards found. Load some with 'pipeline import <file>'.".dimmed()
        );
        return;
    }

    println!("{}", " PIPELINE ".on_blue().white().bold());
    println!();

    for col in &board.columns {
        let cards = board.cards_in(&col.id);
        let total: f64 = cards.iter().map(|c| c.value).sum();
        let title: ColoredString = match col.kind {
            StageKind::Won => col.title.as_str().green().bold(),
            StageKind::Lost => col.title.as_str().red().bold(),
            StageKind::Open => col.title.as_str().cyan().bold(),
        };
        println!(
            " {} {} {} {}",
            "▸".dimmed(),
            title,
            format!("({})", cards.len()).dimmed(),
            format_currency(total).dimmed()
        );

        for card in cards {
            println!("   {}", format_card(card));
        }
        println!();
    }
}

fn format_card(card: &Card) -> String {
    let company = card.company.as_deref().unwrap_or("-");
    format!(
        "{:<28} {:<18} {:>12} {:>5} {:>12}  {}  {}",
        truncate(&card.name, 28),
        truncate(company, 18),
        format_currency(card.value),
        format_percent(u32::from(card.probability)),
        format_currency(weighted_value(card)),
        format_days_in_stage(card.days_in_stage).dimmed(),
        card.id.dimmed()
    )
}

/// Print per-stage totals as a table.
pub fn print_stage_totals(totals: &[StageTotals]) {
    println!("{}", "Stage totals".bold());
    println!(
        "{:<20} {:>6} {:>14} {:>14}",
        "Stage", "Cards", "Value", "Weighted"
    );
    println!("{}", "─".repeat(57));

    for row in totals {
        println!(
            "{:<20} {:>6} {:>14} {:>14}",
            truncate(&row.title, 20),
            row.count,
            format_currency(row.total_value),
            format_currency(row.weighted_value).cyan()
        );
    }

    let value: f64 = totals.iter().map(|t| t.total_value).sum();
    let weighted: f64 = totals.iter().map(|t| t.weighted_value).sum();
    println!("{}", "─".repeat(57));
    println!(
        "{:<20} {:>6} {:>14} {:>14}",
        "Total".bold(),
        totals.iter().map(|t| t.count).sum::<usize>(),
        format_currency(value),
        format_currency(weighted).cyan().bold()
    );
}

/// Print the win/loss funnel.
pub fn print_win_loss(summary: &WinLossSummary) {
    println!("{}", "Win rate by stage".bold());
    if summary.stages.is_empty() {
        println!("{}", "No cards on the board.".dimmed());
        return;
    }

    for row in &summary.stages {
        let bar_len = (row.win_rate as usize) / 5;
        println!(
            "{:<20} {:>3} of {:<3} {:>5} {}",
            truncate(&row.title, 20),
            row.won,
            row.total,
            format_percent(row.win_rate),
            "█".repeat(bar_len).green()
        );
    }
    println!();
    println!(
        " {} {} won {} {} closed ({})",
        "■".cyan(),
        summary.won.to_string().green().bold(),
        "·".dimmed(),
        summary.closed,
        format_percent(summary.overall_win_rate).bold()
    );
}

/// Print one user's preferences.
pub fn print_preferences(user_id: &str, prefs: &Preferences, defaults: bool) {
    let suffix = if defaults { " (defaults)" } else { "" };
    println!("{}{}", user_id.cyan().bold(), suffix.dimmed());
    println!("  {}: {}", "Date format".bold(), prefs.date_format);
    println!("  {}: {}", "Default view".bold(), prefs.default_view.as_str());
    println!("  {}: {}", "Items per page".bold(), prefs.items_per_page);
    println!(
        "  {}: {}",
        "Notifications".bold(),
        if prefs.notifications_enabled { "on".green() } else { "off".dimmed() }
    );
    println!("  {}: {}", "Theme".bold(), prefs.theme);
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Contoso", 10), "Contoso");
        assert_eq!(truncate("Contoso Pharmaceuticals", 8), "Contoso…");
        assert_eq!(truncate("Zürich Bank", 6), "Züric…");
    }
}
