use comfy_table::presets::ASCII_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use treeforge::optimizer::CandidateTree;
use treeforge::tree::{Branch, Tree};

const MAX_NEWICK_WIDTH: usize = 60;

fn shorten(text: &str) -> String {
    if text.chars().count() <= MAX_NEWICK_WIDTH {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX_NEWICK_WIDTH - 3).collect();
        format!("{}...", head)
    }
}

pub fn print_top_trees(trees: &[&CandidateTree]) {
    let Some(best) = trees.first() else {
        return;
    };
    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.add_row(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Id"),
        Cell::new("Score").fg(Color::Cyan),
        Cell::new("Delta"),
        Cell::new("Topology"),
    ]);
    for i in 1..=3 {
        if let Some(col) = table.column_mut(i) {
            col.set_cell_alignment(CellAlignment::Right);
        }
    }

    for (rank, entry) in trees.iter().enumerate() {
        let delta = entry.score - best.score;
        let delta_cell = if rank == 0 {
            Cell::new("-")
        } else {
            Cell::new(format!("{:.4}", delta)).fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(rank + 1).add_attribute(Attribute::Bold),
            Cell::new(entry.id),
            Cell::new(format!("{:.4}", entry.score)).fg(Color::Cyan),
            delta_cell,
            Cell::new(shorten(&entry.tree.fingerprint())),
        ]);
    }
    println!("\n{}", table);
}

/// Support of each internal branch of `tree`, listed by the smaller side of
/// its split.
pub fn print_branch_support(tree: &Tree, support: &[(Branch, f64)]) {
    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.add_row(vec![
        Cell::new("Branch").add_attribute(Attribute::Bold),
        Cell::new("Clade"),
        Cell::new("Support").fg(Color::Green),
    ]);
    if let Some(col) = table.column_mut(2) {
        col.set_cell_alignment(CellAlignment::Right);
    }

    let taxa = tree.taxa();
    let n = tree.num_taxa();
    for &(branch, value) in support {
        let split = tree.split_of(branch);
        let side: Vec<usize> = if split.count() * 2 <= n {
            split.taxa().collect()
        } else {
            (0..n).filter(|&t| !split.contains(t)).collect()
        };
        let names: Vec<&str> = side.iter().map(|&t| taxa[t].as_str()).collect();
        let color = if value >= 0.95 {
            Color::Green
        } else if value >= 0.7 {
            Color::Yellow
        } else {
            Color::Red
        };
        table.add_row(vec![
            Cell::new(format!("{}-{}", branch.node1, branch.node2)),
            Cell::new(shorten(&names.join(","))),
            Cell::new(format!("{:.1}%", value * 100.0)).fg(color),
        ]);
    }
    println!("\n{}", table);
}
