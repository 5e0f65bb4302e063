//! PNG rendering of measured curves and their linear fits.
//!
//! Captions, tick labels and legends use the bundled DejaVu Sans unless
//! `report.font_path` names another TrueType font (needed for CJK titles).

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Context;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::FontStyle;

use super::fit::LinearFit;

const BUNDLED_FAMILY: &str = "labreport-sans";
const CUSTOM_FAMILY: &str = "labreport-custom";
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");
const SIZE: (u32, u32) = (1000, 700);

pub(super) fn draw_err(e: impl std::fmt::Display) -> anyhow::Error {
    anyhow::anyhow!("plot rendering failed: {}", e)
}

/// What to draw.
#[derive(Debug, Clone)]
pub struct Figure<'a> {
    pub title: &'a str,
    pub x_label: &'a str,
    pub y_label: &'a str,
    pub points: Vec<(f64, f64)>,
    pub fit: Option<LinearFit>,
}

#[derive(Debug, Clone)]
pub struct Plotter {
    family: &'static str,
}

impl Plotter {
    /// Plotter labelling with the bundled font.
    pub fn bundled() -> anyhow::Result<Self> {
        static REGISTERED: OnceLock<bool> = OnceLock::new();
        let registered = *REGISTERED.get_or_init(|| {
            plotters::style::register_font(BUNDLED_FAMILY, FontStyle::Normal, BUNDLED_FONT).is_ok()
        });
        if !registered {
            anyhow::bail!("bundled plot font could not be loaded");
        }
        Ok(Self {
            family: BUNDLED_FAMILY,
        })
    }

    /// Label with `font` if given, else with the bundled font.
    pub fn with_font(font: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = font else {
            return Self::bundled();
        };
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading plot font {}", path.display()))?;
        // The font registry keeps a 'static reference for the process lifetime.
        let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        plotters::style::register_font(CUSTOM_FAMILY, FontStyle::Normal, bytes)
            .map_err(|_| anyhow::anyhow!("invalid plot font {}", path.display()))?;
        tracing::debug!("Registered plot font {}", path.display());
        Ok(Self {
            family: CUSTOM_FAMILY,
        })
    }

    /// Registered font family used for every text element.
    pub(super) fn family(&self) -> &'static str {
        self.family
    }

    pub fn render(&self, figure: &Figure<'_>, path: &Path) -> anyhow::Result<()> {
        if figure.points.is_empty() {
            anyhow::bail!("nothing to plot: no numeric (x, y) pairs");
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.draw(BitMapBackend::new(path, SIZE).into_drawing_area(), figure)
    }

    fn draw<DB: DrawingBackend>(
        &self,
        root: DrawingArea<DB, Shift>,
        figure: &Figure<'_>,
    ) -> anyhow::Result<()> {
        let family = self.family;
        let mut points = figure.points.clone();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (x_range, y_range) = bounds(&points, figure.fit.as_ref());

        root.fill(&WHITE).map_err(draw_err)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(30)
            .caption(figure.title, (family, 30))
            .x_label_area_size(50)
            .y_label_area_size(70)
            .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)
            .map_err(draw_err)?;

        chart
            .configure_mesh()
            .x_desc(figure.x_label)
            .y_desc(figure.y_label)
            .label_style((family, 18))
            .axis_desc_style((family, 20))
            .draw()
            .map_err(draw_err)?;

        chart
            .draw_series(LineSeries::new(points.iter().copied(), BLUE.stroke_width(1)))
            .map_err(draw_err)?;
        chart
            .draw_series(points.iter().map(|p| Circle::new(*p, 5, BLUE.filled())))
            .map_err(draw_err)?
            .label("measured")
            .legend(|(x, y)| Rectangle::new([(x + 5, y - 5), (x + 15, y + 5)], BLUE.filled()));

        if let Some(fit) = figure.fit {
            let (x0, x1) = (points[0].0, points[points.len() - 1].0);
            chart
                .draw_series(LineSeries::new(
                    [(x0, fit.predict(x0)), (x1, fit.predict(x1))],
                    RED.stroke_width(2),
                ))
                .map_err(draw_err)?
                .label(format!(
                    "y = {:.4}x + {:.4}, R² = {:.4}",
                    fit.slope, fit.intercept, fit.r_squared
                ))
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED.stroke_width(2)));
        }

        chart
            .configure_series_labels()
            .label_font((family, 18))
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(draw_err)?;

        root.present().map_err(draw_err)?;
        Ok(())
    }
}

/// Padded axis ranges covering the points and the fitted line.
fn bounds(points: &[(f64, f64)], fit: Option<&LinearFit>) -> ((f64, f64), (f64, f64)) {
    let mut xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let mut ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    if let Some(fit) = fit {
        for x in [xs[0], xs[xs.len() - 1]] {
            ys.push(fit.predict(x));
        }
    }
    xs.retain(|v| v.is_finite());
    ys.retain(|v| v.is_finite());
    (padded(&xs), padded(&ys))
}

fn padded(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let span = max - min;
    if span == 0.0 {
        let pad = if min == 0.0 { 1.0 } else { min.abs() * 0.1 };
        return (min - pad, max + pad);
    }
    (min - span * 0.05, max + span * 0.05)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn figure(title: &str) -> Figure<'_> {
        Figure {
            title,
            x_label: "x / m",
            y_label: "F / N",
            points: vec![(3.0, 7.0), (1.0, 3.0), (2.0, 5.0)],
            fit: None,
        }
    }

    fn pixels(plotter: &Plotter, figure: &Figure<'_>) -> Vec<u8> {
        let mut buffer = vec![0u8; (SIZE.0 * SIZE.1 * 3) as usize];
        let root = BitMapBackend::with_buffer(&mut buffer, SIZE).into_drawing_area();
        plotter.draw(root, figure).unwrap();
        buffer
    }

    #[test]
    fn padded_ranges_handle_flat_data() {
        assert_eq!(padded(&[0.0, 10.0]), (-0.5, 10.5));
        assert_eq!(padded(&[0.0, 0.0]), (-1.0, 1.0));
        assert_eq!(padded(&[]), (0.0, 1.0));
    }

    #[test]
    fn curve_writes_png() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plots/curve.png");
        Plotter::bundled()
            .unwrap()
            .render(&figure("F vs x"), &path)
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[..8], PNG_MAGIC);
    }

    #[test]
    fn fit_writes_png() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("fit.png");
        let mut fitted = figure("F vs x");
        fitted.fit = Some(LinearFit {
            slope: 2.0,
            intercept: 1.0,
            r_squared: 1.0,
        });
        Plotter::with_font(None).unwrap().render(&fitted, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn title_is_drawn_by_default() {
        let plotter = Plotter::with_font(None).unwrap();
        let short = pixels(&plotter, &figure("A"));
        let long = pixels(&plotter, &figure("Spring force against extension"));

        assert!(short.iter().any(|&b| b < 64), "nothing dark was drawn");
        assert_ne!(short, long);
    }

    #[test]
    fn empty_figure_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut empty = figure("");
        empty.points.clear();
        assert!(Plotter::bundled()
            .unwrap()
            .render(&empty, &temp.path().join("x.png"))
            .is_err());
    }

    #[test]
    fn unreadable_fonts_are_errors() {
        assert!(Plotter::with_font(Some(Path::new("/nonexistent/font.ttf"))).is_err());

        let temp = tempfile::tempdir().expect("tempdir");
        let bogus = temp.path().join("bogus.ttf");
        std::fs::write(&bogus, b"not a font").unwrap();
        assert!(Plotter::with_font(Some(&bogus)).is_err());
    }
}
