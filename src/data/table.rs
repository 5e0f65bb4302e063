//! Raw-data tables rendered as PNG images, one per uploaded dataset.
//!
//! The layout is a three-line table: rules above and below the header and
//! under the last row, the dataset name as caption.

use std::path::{Path, PathBuf};

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use super::plot::{draw_err, Plotter};
use super::{format_number, Cell, Dataset};

const FONT_SIZE: u32 = 18;
const CAPTION_SIZE: u32 = 22;
const ROW_HEIGHT: u32 = 34;
const CAPTION_HEIGHT: u32 = 44;
const CELL_PADDING: u32 = 28;
const MIN_COLUMN_WIDTH: u32 = 64;
const MARGIN: u32 = 20;

/// Text of every cell, header row first.
pub fn cell_texts(dataset: &Dataset) -> Vec<Vec<String>> {
    let columns = dataset.columns();
    let mut rows = vec![columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>()];
    for row in 0..dataset.row_count() {
        rows.push(
            columns
                .iter()
                .map(|c| match &c.values[row] {
                    Cell::Number(v) => format_number(*v),
                    Cell::Text(t) => t.clone(),
                    Cell::Empty => String::new(),
                })
                .collect(),
        );
    }
    rows
}

/// Approximate rendered width in pixels at `size`.
fn text_width(text: &str, size: u32) -> u32 {
    text.chars()
        .map(|c| if c.is_ascii() { size * 6 / 10 + 1 } else { size })
        .sum()
}

fn column_widths(rows: &[Vec<String>]) -> Vec<u32> {
    let columns = rows.first().map(Vec::len).unwrap_or(0);
    (0..columns)
        .map(|c| {
            rows.iter()
                .filter_map(|row| row.get(c))
                .map(|text| text_width(text, FONT_SIZE) + CELL_PADDING)
                .max()
                .unwrap_or(0)
                .max(MIN_COLUMN_WIDTH)
        })
        .collect()
}

/// Render `dataset` to the PNG at `path`.
pub fn render_table(dataset: &Dataset, plotter: &Plotter, path: &Path) -> anyhow::Result<()> {
    let rows = cell_texts(dataset);
    let widths = column_widths(&rows);
    let table_width: u32 = widths.iter().sum();
    let width = table_width.max(text_width(&dataset.name, CAPTION_SIZE)) + 2 * MARGIN;
    let height = CAPTION_HEIGHT + rows.len() as u32 * ROW_HEIGHT + 2 * MARGIN;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    draw_table(root, plotter.family(), &dataset.name, &rows, &widths)
}

fn draw_table<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    family: &str,
    caption: &str,
    rows: &[Vec<String>],
    widths: &[u32],
) -> anyhow::Result<()> {
    root.fill(&WHITE).map_err(draw_err)?;
    let (width, _) = root.dim_in_pixel();
    let centered = Pos::new(HPos::Center, VPos::Center);

    let caption_style = TextStyle::from((family, CAPTION_SIZE).into_font())
        .color(&BLACK)
        .pos(centered);
    if !caption.is_empty() {
        let middle = (width / 2) as i32;
        root.draw_text(caption, &caption_style, (middle, (MARGIN + CAPTION_HEIGHT / 2) as i32))
            .map_err(draw_err)?;
    }

    let table_width: u32 = widths.iter().sum();
    let left = (width.saturating_sub(table_width) / 2) as i32;
    let right = left + table_width as i32;
    let top = (MARGIN + CAPTION_HEIGHT) as i32;
    let row_height = ROW_HEIGHT as i32;

    let cell_style = TextStyle::from((family, FONT_SIZE).into_font())
        .color(&BLACK)
        .pos(centered);
    for (r, row) in rows.iter().enumerate() {
        let y = top + r as i32 * row_height + row_height / 2;
        let mut x = left;
        for (text, w) in row.iter().zip(widths) {
            if !text.is_empty() {
                root.draw_text(text, &cell_style, (x + *w as i32 / 2, y))
                    .map_err(draw_err)?;
            }
            x += *w as i32;
        }
    }

    let bottom = top + rows.len() as i32 * row_height;
    let mut rules = vec![(top, 2), (bottom, 2)];
    if rows.len() > 1 {
        rules.push((top + row_height, 1));
    }
    for (y, thickness) in rules {
        root.draw(&PathElement::new(
            vec![(left, y), (right, y)],
            BLACK.stroke_width(thickness),
        ))
        .map_err(draw_err)?;
    }

    root.present().map_err(draw_err)?;
    Ok(())
}

/// Write `dir/table_<dataset>.png` and return its path.
pub fn write_table(dataset: &Dataset, plotter: &Plotter, dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("table_{}.png", dataset.name));
    render_table(dataset, plotter, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn cells_follow_header_and_row_order() {
        let mut ds = Dataset::from_numbers("spring_1", &[("x", &[0.5, 1.0]), ("F", &[1.0, 2.0])]);
        ds.set_column("note", vec![Cell::Text("ok".into()), Cell::Empty])
            .unwrap();

        let rows = cell_texts(&ds);

        assert_eq!(rows[0], vec!["x", "F", "note"]);
        assert_eq!(rows[1], vec!["0.5", "1", "ok"]);
        assert_eq!(rows[2], vec!["1", "2", ""]);
    }

    #[test]
    fn long_cells_widen_their_column() {
        let rows = vec![
            vec!["x".to_string(), "reading".to_string()],
            vec!["1".to_string(), "123456789.123456".to_string()],
        ];
        let widths = column_widths(&rows);
        assert_eq!(widths[0], MIN_COLUMN_WIDTH);
        assert!(widths[1] > text_width("123456789.123456", FONT_SIZE));
        assert!(column_widths(&[]).is_empty());
    }

    #[test]
    fn table_image_is_named_after_dataset() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ds = Dataset::from_numbers("pendulum", &[("L", &[1.0, 0.8]), ("T", &[2.0, 1.8])]);
        let plotter = Plotter::bundled().unwrap();

        let path = write_table(&ds, &plotter, &temp.path().join("plots")).unwrap();

        assert_eq!(path, temp.path().join("plots/table_pendulum.png"));
        assert_eq!(std::fs::read(&path).unwrap()[..8], PNG_MAGIC);
    }

    #[test]
    fn cell_text_is_drawn() {
        let rows = vec![vec!["L".to_string()], vec!["1".to_string()]];
        let widths = column_widths(&rows);
        let size = (200, 160);
        let mut buffer = vec![255u8; (size.0 * size.1 * 3) as usize];
        let root = BitMapBackend::with_buffer(&mut buffer, size).into_drawing_area();
        let family = Plotter::bundled().unwrap().family();

        draw_table(root, family, "", &rows, &widths).unwrap();

        // Header row sits between the top rule and the header rule.
        let top = (MARGIN + CAPTION_HEIGHT) as usize;
        let dark = (top + 4..top + ROW_HEIGHT as usize - 4)
            .flat_map(|y| (0..size.0 as usize).map(move |x| (y * size.0 as usize + x) * 3))
            .filter(|&i| buffer[i] < 128)
            .count();
        assert!(dark > 0);
    }
}
