//! Human-readable run summaries
//!
//! Printed to stdout after a crawl or batch when JSON output is not requested.

use crate::batch::BatchReport;
use crate::crawler::CrawlSummary;
use std::fmt::Write;

/// Formats a crawl summary for the terminal
///
/// # Arguments
///
/// * `summary` - The traversal summary of a finished run
///
/// # Returns
///
/// A multi-line report
pub fn format_crawl_summary(summary: &CrawlSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== Crawl Summary ===\n");
    let _ = writeln!(out, "Start URL: {}", summary.start_url);
    let _ = writeln!(out, "Strategy: {}", summary.strategy);
    if summary.cancelled {
        let _ = writeln!(out, "Status: cancelled (partial results)");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Pages:");
    let _ = writeln!(out, "  Visited: {}", summary.pages_visited);
    let _ = writeln!(out, "  Succeeded: {}", summary.pages_succeeded);
    let _ = writeln!(out, "  Errors: {}", summary.errors.len());
    let _ = writeln!(out, "  Max depth reached: {}", summary.max_depth_reached);
    let _ = writeln!(out, "  Elapsed: {:.2}s", summary.elapsed_ms as f64 / 1000.0);
    let _ = writeln!(out);

    if summary.pages_skipped > 0 {
        let pruned = &summary.pruned;
        let _ = writeln!(out, "Links pruned ({}):", summary.pages_skipped);
        for (label, count) in [
            ("off domain", pruned.off_domain),
            ("depth limit", pruned.depth),
            ("pattern", pruned.pattern),
            ("duplicate", pruned.duplicate),
            ("page limit", pruned.page_cap),
        ] {
            if count > 0 {
                let _ = writeln!(out, "  {}: {}", label, count);
            }
        }
        let _ = writeln!(out);
    }

    if !summary.errors.is_empty() {
        let _ = writeln!(out, "Errors:");
        for error in &summary.errors {
            let _ = writeln!(
                out,
                "  [{}] {} (depth {}): {}",
                error.status, error.url, error.depth, error.message
            );
        }
        let _ = writeln!(out);
    }

    let success_rate = if summary.pages_visited > 0 {
        (summary.pages_succeeded as f64 / summary.pages_visited as f64) * 100.0
    } else {
        0.0
    };
    let _ = writeln!(
        out,
        "Success Rate: {:.1}% ({} / {} pages)",
        success_rate, summary.pages_succeeded, summary.pages_visited
    );

    out
}

/// Prints a crawl summary to stdout
pub fn print_crawl_summary(summary: &CrawlSummary) {
    print!("{}", format_crawl_summary(summary));
}

/// Formats a batch report for the terminal
pub fn format_batch_summary(report: &BatchReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== Batch Summary ===\n");
    let _ = writeln!(out, "Total: {}", report.total());
    let _ = writeln!(out, "Successful: {}", report.successful());
    let _ = writeln!(out, "Failed: {}", report.failed());
    let _ = writeln!(out, "Peak in flight: {}", report.peak_in_flight);
    if report.pressure_waits > 0 {
        let _ = writeln!(out, "Memory pressure waits: {}", report.pressure_waits);
    }
    if report.cancelled {
        let _ = writeln!(out, "Status: cancelled (partial results)");
    }
    let _ = writeln!(out, "Elapsed: {:.2}s", report.elapsed_ms as f64 / 1000.0);

    let failures: Vec<_> = report
        .outcomes
        .iter()
        .filter_map(|o| o.error_message().map(|message| (o, message)))
        .collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "\nFailures:");
        for (outcome, message) in failures {
            let _ = writeln!(out, "  [{}] {}: {}", outcome.status(), outcome.task.url, message);
        }
    }

    out
}

/// Prints a batch report to stdout
pub fn print_batch_summary(report: &BatchReport) {
    print!("{}", format_batch_summary(report));
}
