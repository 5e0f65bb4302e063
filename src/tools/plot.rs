//! Plotting tools: plain curves and least-squares lines.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{str_arg, Tool};
use crate::agent::AgentSession;
use crate::data::fit::{least_squares, paired_points, LinearFit};
use crate::data::format_number;
use crate::data::plot::Figure;
use crate::workspace::Workspace;

fn plot_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "dataset": { "type": "string", "description": "Dataset holding both columns" },
            "x": { "type": "string", "description": "Column for the horizontal axis" },
            "y": { "type": "string", "description": "Column for the vertical axis" },
            "title": { "type": "string", "description": "Figure title" },
            "name": { "type": "string", "description": "File name without extension; the figure is saved as plots/<name>.png" }
        },
        "required": ["dataset", "x", "y", "title", "name"]
    })
}

struct PlotRequest<'a> {
    dataset: &'a str,
    x: &'a str,
    y: &'a str,
    title: &'a str,
    name: &'a str,
}

impl<'a> PlotRequest<'a> {
    fn parse(args: &'a Value) -> anyhow::Result<Self> {
        let request = Self {
            dataset: str_arg(args, "dataset")?,
            x: str_arg(args, "x")?,
            y: str_arg(args, "y")?,
            title: str_arg(args, "title")?,
            name: str_arg(args, "name")?.trim(),
        };
        Workspace::check_name(request.name)?;
        Ok(request)
    }

    /// Render into the session's plot directory and record the figure.
    fn draw(
        &self,
        session: &mut AgentSession,
        fit_line: bool,
    ) -> anyhow::Result<(std::path::PathBuf, Option<LinearFit>)> {
        let dataset = session.datasets.get(self.dataset)?;
        let xs = dataset.numbers(self.x)?;
        let ys = dataset.numbers(self.y)?;
        let fit = if fit_line {
            Some(least_squares(&xs, &ys)?)
        } else {
            None
        };
        let figure = Figure {
            title: self.title,
            x_label: self.x,
            y_label: self.y,
            points: paired_points(&xs, &ys)?,
            fit,
        };

        let path = session.plots_dir().join(format!("{}.png", self.name));
        session.plotter().render(&figure, &path)?;
        session.record_figure(path.clone());
        tracing::debug!("Saved figure {}", path.display());
        Ok((path, fit))
    }
}

/// x-y line chart with markers.
pub struct PlotCurve;

#[async_trait]
impl Tool for PlotCurve {
    fn name(&self) -> &str {
        "plot_curve"
    }

    fn description(&self) -> &str {
        "Draw a curve of column y against column x (line with markers) and save it as a PNG. \
         Use it for relations that are not fitted with a straight line."
    }

    fn parameters_schema(&self) -> Value {
        plot_schema()
    }

    async fn execute(&self, args: Value, session: &mut AgentSession) -> anyhow::Result<String> {
        let request = PlotRequest::parse(&args)?;
        let (path, _) = request.draw(session, false)?;
        Ok(format!("Figure saved to {}", path.display()))
    }
}

/// Data points with a first-degree least-squares line.
pub struct PlotLeastSquares;

#[async_trait]
impl Tool for PlotLeastSquares {
    fn name(&self) -> &str {
        "plot_least_squares"
    }

    fn description(&self) -> &str {
        "Fit y = slope * x + intercept by least squares, draw the data with the fitted line and \
         save it as a PNG. Returns the figure path, slope, intercept and R²."
    }

    fn parameters_schema(&self) -> Value {
        plot_schema()
    }

    async fn execute(&self, args: Value, session: &mut AgentSession) -> anyhow::Result<String> {
        let request = PlotRequest::parse(&args)?;
        let (path, fit) = request.draw(session, true)?;
        let fit = fit.ok_or_else(|| anyhow::anyhow!("least-squares fit missing"))?;
        Ok(format!(
            "Figure saved to {}\nslope = {}\nintercept = {}\nR² = {}",
            path.display(),
            format_number(fit.slope),
            format_number(fit.intercept),
            format_number(fit.r_squared)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::plot::Plotter;
    use crate::data::{Dataset, Datasets};

    fn session(dir: &std::path::Path, x: &[f64], y: &[f64]) -> AgentSession {
        let mut sets = Datasets::new();
        sets.insert(Dataset::from_numbers("d", &[("x", x), ("y", y)]));
        AgentSession::new(sets, dir.join("plots"), Plotter::bundled().expect("bundled font"))
    }

    fn args(name: &str) -> Value {
        json!({"dataset": "d", "x": "x", "y": "y", "title": "y vs x", "name": name})
    }

    #[tokio::test]
    async fn least_squares_reports_fit_of_exact_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path(), &[1.0, 2.0, 3.0, 4.0], &[3.0, 5.0, 7.0, 9.0]);

        let out = PlotLeastSquares
            .execute(args("fit"), &mut session)
            .await
            .unwrap();
        assert!(out.contains("slope = 2\n"), "{}", out);
        assert!(out.contains("intercept = 1\n"), "{}", out);
        assert!(out.ends_with("R² = 1"), "{}", out);

        let expected = temp.path().join("plots/fit.png");
        assert!(expected.exists());
        assert_eq!(session.figures(), &[expected]);
    }

    #[tokio::test]
    async fn curve_records_figures_in_call_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path(), &[1.0, 2.0], &[1.0, 4.0]);

        PlotCurve.execute(args("b"), &mut session).await.unwrap();
        PlotCurve.execute(args("a"), &mut session).await.unwrap();
        PlotCurve.execute(args("b"), &mut session).await.unwrap();

        let names: Vec<String> = session
            .figures()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["b.png", "a.png"]);
    }

    #[tokio::test]
    async fn degenerate_fits_are_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut one_point = session(temp.path(), &[1.0], &[2.0]);
        assert!(PlotLeastSquares.execute(args("f"), &mut one_point).await.is_err());

        let mut flat_x = session(temp.path(), &[2.0, 2.0], &[1.0, 3.0]);
        let err = PlotLeastSquares
            .execute(args("f"), &mut flat_x)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("x values are all equal"));
        assert!(flat_x.figures().is_empty());
    }

    #[tokio::test]
    async fn figure_name_must_stay_in_plot_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path(), &[1.0, 2.0], &[1.0, 2.0]);
        assert!(PlotCurve.execute(args("../escape"), &mut session).await.is_err());
    }
}
