use std::io::Write;

use crate::tree::NetworkTree;

/// Generate a text report: summary counters, the tree dump, then the
/// neighborhoods bordering several subnets
pub fn generate_report<W: Write>(tree: &NetworkTree, mut writer: W) -> std::io::Result<()> {
    let stats = tree.statistics();
    let subnets = tree.subnets().len();

    writeln!(writer, "hoptree report")?;
    writeln!(
        writer,
        "Subnets: {}  Neighborhoods: {}  Largest interface set: {}",
        subnets,
        stats.neighborhoods,
        tree.largest_interface_set()
    )?;
    writeln!(
        writer,
        "Trunk: {} hop(s){}",
        tree.trunk_size(),
        if tree.has_incomplete_trunk() {
            " (incomplete)"
        } else {
            ""
        }
    )?;
    writeln!(writer)?;

    writeln!(writer, "{:<40} {:>8} {:>7}", "Neighborhoods", "Count", "Share")?;
    writeln!(writer, "{}", "-".repeat(57))?;
    for (label, count) in [
        ("with only subnet children", stats.subnet_only),
        ("with complete linkage", stats.complete_linkage),
        ("with partial linkage (1-2 missing)", stats.partial_linkage),
        ("fully measured", stats.fully_measured),
    ] {
        let share = if stats.neighborhoods > 0 {
            count as f64 * 100.0 / stats.neighborhoods as f64
        } else {
            0.0
        };
        writeln!(writer, "{:<40} {:>8} {:>6.1}%", label, count, share)?;
    }
    writeln!(writer)?;

    writeln!(writer, "Tree:")?;
    tree.visit(&mut writer)?;
    writeln!(writer)?;

    writeln!(writer, "Internals:")?;
    tree.internals(&mut writer)?;

    Ok(())
}

/// Generate report to string
pub fn generate_report_string(tree: &NetworkTree) -> String {
    let mut buf = Vec::new();
    generate_report(tree, &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}
