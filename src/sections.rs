use crate::models::Grid;

pub const GRAND_TOTAL: &str = "grand total";

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub label: String,
    pub rows: Grid,
}

/// A sheet cut into labelled blocks. `preamble` holds the rows ahead of the
/// first label that was found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sections {
    pub preamble: Grid,
    pub blocks: Vec<Section>,
}

impl Sections {
    pub fn get(&self, label: &str) -> &[Vec<String>] {
        self.blocks
            .iter()
            .find(|block| block.label.eq_ignore_ascii_case(label))
            .map(|block| block.rows.as_slice())
            .unwrap_or(&[])
    }
}

fn first_cell(row: &[String]) -> &str {
    row.first().map(|cell| cell.trim()).unwrap_or("")
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

pub fn is_grand_total(row: &[String]) -> bool {
    first_cell(row).to_lowercase().contains(GRAND_TOTAL)
}

/// First row, in row order, whose leading cell contains `label`
/// (case-insensitive).
pub fn find_label_row(grid: &Grid, label: &str) -> Option<usize> {
    let needle = label.to_lowercase();
    grid.iter()
        .position(|row| first_cell(row).to_lowercase().contains(&needle))
}

fn collect_block(grid: &Grid, start: usize, boundaries: &[usize]) -> Grid {
    let end = boundaries
        .iter()
        .copied()
        .filter(|&idx| idx >= start)
        .min()
        .unwrap_or(grid.len());

    grid[start..end]
        .iter()
        .take_while(|row| !is_grand_total(row))
        .filter(|row| !is_blank(row))
        .cloned()
        .collect()
}

/// Partitions `grid` on the literal label rows in `labels`. Each block runs
/// from the row after its label to the row before the next label or
/// "Grand Total" row. A label that never appears yields an empty block.
pub fn split_sections(grid: &Grid, labels: &[&str]) -> Sections {
    let found: Vec<Option<usize>> = labels
        .iter()
        .map(|label| find_label_row(grid, label))
        .collect();
    let boundaries: Vec<usize> = found.iter().flatten().copied().collect();

    let preamble = collect_block(grid, 0, &boundaries);

    let blocks = labels
        .iter()
        .zip(found.iter())
        .map(|(label, position)| Section {
            label: label.to_string(),
            rows: match position {
                Some(idx) => collect_block(grid, idx + 1, &boundaries),
                None => Vec::new(),
            },
        })
        .collect();

    Sections { preamble, blocks }
}
