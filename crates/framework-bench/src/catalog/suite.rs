//! The standard benchmark suite
//!
//! Every implementation renders the same table app: buttons with the ids
//! `run`, `runlots`, `add`, `update`, `clear` and `swaprows`, and a table
//! whose rows hold an id cell, a label link and a remove icon.

use std::time::Duration;

use super::{Benchmark, BenchmarkInfo, BenchmarkKind, StartupBenchmark, Step, TimedBenchmark};
use crate::config::RunOptions;
use crate::dom::ElementPath;
use crate::error::Result;

fn path(p: &str) -> Result<ElementPath> {
    p.parse()
}

fn wait_id(id: &str, timeout: Duration) -> Step {
    Step::WaitForId {
        id: id.to_string(),
        timeout: Some(timeout),
    }
}

fn click_id(id: &str) -> Step {
    Step::ClickId { id: id.to_string() }
}

fn click_path(p: &str) -> Result<Step> {
    Ok(Step::ClickPath { path: path(p)? })
}

fn wait_path(p: &str) -> Result<Step> {
    Ok(Step::WaitForPath {
        path: path(p)?,
        timeout: None,
    })
}

fn wait_absent(p: &str) -> Result<Step> {
    Ok(Step::WaitForPathAbsent {
        path: path(p)?,
        timeout: None,
    })
}

fn wait_text(p: &str, text: impl Into<String>) -> Result<Step> {
    Ok(Step::WaitForText {
        path: path(p)?,
        text: text.into(),
        timeout: None,
    })
}

fn timed(
    id: &str,
    label: &str,
    description: String,
    kind: BenchmarkKind,
    throttle: Option<f64>,
) -> TimedBenchmark {
    TimedBenchmark {
        info: BenchmarkInfo {
            id: id.to_string(),
            label: label.to_string(),
            description,
            kind,
            throttle,
        },
        init: Vec::new(),
        run: Vec::new(),
        after: Vec::new(),
    }
}

/// Init shared by most CPU benchmarks: render 1,000 rows
fn with_thousand_rows(short: Duration, ready: &str) -> Result<Vec<Step>> {
    Ok(vec![wait_id("run", short), click_id("run"), wait_path(ready)?])
}

/// Build the standard suite; warm-up loops follow `options.warmup_count`
pub fn standard_suite(options: &RunOptions) -> Result<Vec<Benchmark>> {
    let short = options.short_timeout;
    let warmup = options.warmup_count;
    let mut suite = Vec::new();

    let mut run1k = timed(
        "01_run1k",
        "create rows",
        "creating 1,000 rows".to_string(),
        BenchmarkKind::Cpu,
        None,
    );
    run1k.init = vec![wait_id("add", short)];
    run1k.run = vec![click_id("add"), wait_path("//tbody/tr[1000]/td[2]/a")?];
    suite.push(run1k);

    let mut replace = timed(
        "02_replace1k",
        "replace all rows",
        format!("updating all 1,000 rows ({} warmup runs).", warmup),
        BenchmarkKind::Cpu,
        None,
    );
    replace.init.push(wait_id("run", short));
    for i in 0..warmup {
        replace.init.push(click_id("run"));
        replace
            .init
            .push(wait_text("//tbody/tr[1]/td[1]", (i * 1000 + 1).to_string())?);
    }
    replace.run = vec![
        click_id("run"),
        wait_text("//tbody/tr[1]/td[1]", (warmup * 1000 + 1).to_string())?,
    ];
    suite.push(replace);

    let mut update = timed(
        "03_update10th1k_x16",
        "partial update",
        "updating every 10th row for 1,000 rows (3 warmup runs). 16x CPU slowdown.".to_string(),
        BenchmarkKind::Cpu,
        Some(16.0),
    );
    update.init = with_thousand_rows(short, "//tbody/tr[1000]/td[2]/a")?;
    for i in 0..3 {
        update.init.push(click_id("update"));
        update
            .init
            .push(wait_text("//tbody/tr[991]/td[2]/a", " !!!".repeat(i + 1))?);
    }
    update.run = vec![
        click_id("update"),
        wait_text("//tbody/tr[991]/td[2]/a", " !!!".repeat(4))?,
    ];
    suite.push(update);

    let mut select = timed(
        "04_select1k",
        "select row",
        format!(
            "highlighting a selected row. ({} warmup runs). 16x CPU slowdown.",
            warmup
        ),
        BenchmarkKind::Cpu,
        Some(16.0),
    );
    select.init = with_thousand_rows(short, "//tbody/tr[1]/td[2]/a")?;
    for i in 0..=warmup {
        select
            .init
            .push(click_path(&format!("//tbody/tr[{}]/td[2]/a", i + 1))?);
    }
    select.run = vec![
        click_path("//tbody/tr[2]/td[2]/a")?,
        Step::WaitForClass {
            path: path("//tbody/tr[2]")?,
            class: "danger".to_string(),
            timeout: None,
        },
    ];
    suite.push(select);

    let mut swap = timed(
        "05_swap1k",
        "swap rows",
        format!(
            "swap 2 rows for table with 1,000 rows. ({} warmup runs). 4x CPU slowdown.",
            warmup
        ),
        BenchmarkKind::Cpu,
        Some(4.0),
    );
    let swap_cycle = || -> Result<Vec<Step>> {
        Ok(vec![
            Step::CaptureText {
                path: path("//tbody/tr[2]/td[2]/a")?,
                name: "second-row".to_string(),
            },
            click_id("swaprows"),
            Step::WaitForCapturedText {
                path: path("//tbody/tr[999]/td[2]/a")?,
                name: "second-row".to_string(),
                timeout: None,
            },
        ])
    };
    swap.init = with_thousand_rows(short, "//tbody/tr[1]/td[2]/a")?;
    for _ in 0..=warmup {
        swap.init.extend(swap_cycle()?);
    }
    swap.run = swap_cycle()?;
    suite.push(swap);

    // Rows warmup+4 down to 5 are removed one by one, so afterwards row 5
    // holds id warmup+5.
    let mut remove = timed(
        "06_remove-one-1k",
        "remove row",
        format!("removing one row. ({} warmup runs).", warmup),
        BenchmarkKind::Cpu,
        None,
    );
    remove.init = with_thousand_rows(short, "//tbody/tr[1]/td[2]/a")?;
    let next_id = warmup + 5;
    for i in 0..warmup {
        let row = warmup - i + 4;
        remove.init.extend([
            wait_text(&format!("//tbody/tr[{}]/td[1]", row), row.to_string())?,
            click_path(&format!("//tbody/tr[{}]/td[3]/a/span[1]", row))?,
            wait_text(&format!("//tbody/tr[{}]/td[1]", row), next_id.to_string())?,
        ]);
    }
    remove.init.extend([
        wait_text("//tbody/tr[5]/td[1]", next_id.to_string())?,
        wait_text("//tbody/tr[4]/td[1]", "4")?,
        wait_text("//tbody/tr[6]/td[1]", (next_id + 1).to_string())?,
        click_path("//tbody/tr[6]/td[3]/a/span[1]")?,
        wait_text("//tbody/tr[6]/td[1]", (next_id + 2).to_string())?,
    ]);
    remove.run = vec![
        click_path("//tbody/tr[4]/td[3]/a/span[1]")?,
        wait_text("//tbody/tr[4]/td[1]", next_id.to_string())?,
    ];
    suite.push(remove);

    let mut create10k = timed(
        "07_create10k",
        "create many rows",
        "creating 10,000 rows".to_string(),
        BenchmarkKind::Cpu,
        None,
    );
    create10k.init = vec![wait_id("runlots", short)];
    create10k.run = vec![click_id("runlots"), wait_path("//tbody/tr[10000]/td[2]/a")?];
    suite.push(create10k);

    let mut append = timed(
        "08_create1k-after1k_x2",
        "append rows to large table",
        "appending 1,000 to a table of 1,000 rows. 2x CPU slowdown".to_string(),
        BenchmarkKind::Cpu,
        Some(2.0),
    );
    append.init = with_thousand_rows(short, "//tbody/tr[1000]/td[2]/a")?;
    append.run = vec![click_id("add"), wait_path("//tbody/tr[1100]/td[2]/a")?];
    suite.push(append);

    let mut clear = timed(
        "09_clear1k_x8",
        "clear rows",
        "clearing a table with 1,000 rows. 8x CPU slowdown".to_string(),
        BenchmarkKind::Cpu,
        Some(8.0),
    );
    clear.init = with_thousand_rows(short, "//tbody/tr[1000]/td[2]/a")?;
    clear.run = vec![click_id("clear"), wait_absent("//tbody/tr[1]")?];
    suite.push(clear);

    let mut ready_memory = timed(
        "21_ready-memory",
        "ready memory",
        "Memory usage after page load.".to_string(),
        BenchmarkKind::Memory,
        None,
    );
    ready_memory.init = vec![wait_id("add", short)];
    ready_memory.run = vec![wait_absent("//tbody/tr[1]")?];
    ready_memory.after = vec![click_id("run"), wait_path("//tbody/tr[1]/td[2]/a")?];
    suite.push(ready_memory);

    let mut run_memory = timed(
        "22_run-memory",
        "run memory",
        "Memory usage after adding 1000 rows.".to_string(),
        BenchmarkKind::Memory,
        None,
    );
    run_memory.init = vec![wait_id("add", short)];
    run_memory.run = vec![click_id("run"), wait_path("//tbody/tr[1]/td[2]/a")?];
    suite.push(run_memory);

    let mut update_memory = timed(
        "23_update5-memory",
        "update every 10th row for 1k rows (5 cycles)",
        "Memory usage after clicking update every 10th row 5 times".to_string(),
        BenchmarkKind::Memory,
        None,
    );
    update_memory.init = vec![wait_id("add", short)];
    update_memory.run.push(click_id("run"));
    for i in 0..5 {
        update_memory.run.push(click_id("update"));
        update_memory
            .run
            .push(wait_text("//tbody/tr[1]/td[2]/a", " !!!".repeat(i))?);
    }
    suite.push(update_memory);

    let mut replace_memory = timed(
        "24_run5-memory",
        "replace 1k rows (5 cycles)",
        "Memory usage after clicking create 1000 rows 5 times".to_string(),
        BenchmarkKind::Memory,
        None,
    );
    replace_memory.init = vec![wait_id("add", short)];
    for i in 0..5 {
        replace_memory.run.push(click_id("run"));
        replace_memory
            .run
            .push(wait_text("//tbody/tr[1000]/td[1]", (1000 * (i + 1)).to_string())?);
    }
    suite.push(replace_memory);

    let mut create_clear_memory = timed(
        "25_run-clear-memory",
        "creating/clearing 1k rows (5 cycles)",
        "Memory usage after creating and clearing 1000 rows 5 times".to_string(),
        BenchmarkKind::Memory,
        None,
    );
    create_clear_memory.init = vec![wait_id("add", short)];
    for i in 0..5 {
        create_clear_memory.run.extend([
            click_id("run"),
            wait_text("//tbody/tr[1000]/td[1]", (1000 * (i + 1)).to_string())?,
            click_id("clear"),
            wait_absent("//tbody/tr[1000]/td[1]")?,
        ]);
    }
    suite.push(create_clear_memory);

    let mut benchmarks: Vec<Benchmark> = suite.into_iter().map(Benchmark::Timed).collect();
    benchmarks.push(Benchmark::Startup(StartupBenchmark {
        info: BenchmarkInfo {
            id: "30_startup".to_string(),
            label: "startup time".to_string(),
            description: "Time for loading, parsing and starting up".to_string(),
            kind: BenchmarkKind::Startup,
            throttle: None,
        },
    }));

    Ok(benchmarks)
}
