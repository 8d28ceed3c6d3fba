//! Episode plots (SVG output).
//!
//! Uses the SVG backend to avoid system font dependencies.

use std::path::{Path, PathBuf};

use plotters::prelude::*;
use plotters_svg::SVGBackend;

use crate::error::{TestbenchError, TestbenchResult};
use crate::telemetry::{Telemetry, COL_I_ABC, COL_I_DQ0, COL_V_ABC};

const SIZE: (u32, u32) = (900, 450);
const PHASE_COLORS: [RGBColor; 3] = [BLUE, RED, GREEN];

struct PlotSpec {
    suffix: &'static str,
    caption: &'static str,
    y_desc: &'static str,
    columns: [usize; 3],
    labels: [&'static str; 3],
}

const PLOTS: [PlotSpec; 3] = [
    PlotSpec {
        suffix: "v_abc",
        caption: "Phase voltages",
        y_desc: "Voltages (V)",
        columns: COL_V_ABC,
        labels: ["v_a", "v_b", "v_c"],
    },
    PlotSpec {
        suffix: "i_abc",
        caption: "Phase currents",
        y_desc: "Currents (A)",
        columns: COL_I_ABC,
        labels: ["i_a", "i_b", "i_c"],
    },
    PlotSpec {
        suffix: "i_dq0",
        caption: "dq0 currents",
        y_desc: "Currents DQ0 (A)",
        columns: COL_I_DQ0,
        labels: ["i_d", "i_q", "i_0"],
    },
];

/// `linspace(0, n * dt, n)`, endpoint included.
pub fn time_axis(n: usize, dt: f64) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let step = n as f64 * dt / (n - 1) as f64;
            (0..n).map(|i| i as f64 * step).collect()
        }
    }
}

/// Write `<prefix>_v_abc.svg`, `<prefix>_i_abc.svg` and `<prefix>_i_dq0.svg`.
pub fn render_episode(
    data: &Telemetry,
    dt: f64,
    dir: &Path,
    prefix: &str,
) -> TestbenchResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let t = time_axis(data.len(), dt);
    let mut written = Vec::with_capacity(PLOTS.len());
    for spec in &PLOTS {
        let path = dir.join(format!("{prefix}_{}.svg", spec.suffix));
        let series: Vec<Vec<f64>> = spec.columns.iter().map(|c| data.column(*c)).collect();
        plot_three_phase(&path, spec, &t, &series).map_err(TestbenchError::render)?;
        written.push(path);
    }
    tracing::debug!(files = written.len(), dir = %dir.display(), "rendered episode plots");
    Ok(written)
}

fn plot_three_phase(
    path: &Path,
    spec: &PlotSpec,
    t: &[f64],
    series: &[Vec<f64>],
) -> Result<(), Box<dyn std::error::Error>> {
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    if t.is_empty() {
        root.draw(&Text::new(
            "No telemetry",
            (SIZE.0 as i32 / 2, SIZE.1 as i32 / 2),
            ("sans-serif", 20).into_font().color(&BLACK),
        ))?;
        root.present()?;
        return Ok(());
    }

    let (y_min, y_max) = series
        .iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let (y_min, y_max) = if y_min > y_max {
        (-1.0, 1.0)
    } else {
        let pad = ((y_max - y_min) * 0.05).max(1e-3);
        (y_min - pad, y_max + pad)
    };
    let t_max = t.last().copied().unwrap_or(0.0).max(f64::EPSILON);

    let mut chart = ChartBuilder::on(&root)
        .caption(spec.caption, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..t_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc(spec.y_desc)
        .draw()?;

    for ((values, label), color) in series.iter().zip(spec.labels).zip(PHASE_COLORS) {
        chart
            .draw_series(LineSeries::new(
                t.iter().copied().zip(values.iter().copied()),
                &color,
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::decode;

    #[test]
    fn time_axis_is_inclusive_linspace() {
        let t = time_axis(5, 0.25);
        assert_eq!(t.len(), 5);
        assert_eq!(t[0], 0.0);
        assert!((t[4] - 1.25).abs() < 1e-12);
        assert!(time_axis(0, 1.0).is_empty());
        assert_eq!(time_axis(1, 1.0), vec![0.0]);
    }

    #[test]
    fn writes_three_svg_files() {
        let dir = tempfile::tempdir().unwrap();
        let data = decode(
            "1,2,3,4,5,6,7,8,9,0.1,\n2,3,4,5,6,7,8,9,10,0.2,\n3,4,5,6,7,8,9,10,11,0.3,\n",
        )
        .unwrap()
        .telemetry;
        let files = render_episode(&data, 1e-4, dir.path(), "ep0").unwrap();
        assert_eq!(files.len(), 3);
        for f in &files {
            let svg = std::fs::read_to_string(f).unwrap();
            assert!(svg.contains("<svg"), "{}", f.display());
        }
        assert!(files[1].ends_with("ep0_i_abc.svg"));
    }

    #[test]
    fn empty_episode_still_renders() {
        let dir = tempfile::tempdir().unwrap();
        let files = render_episode(&Telemetry::default(), 1e-4, dir.path(), "empty").unwrap();
        let svg = std::fs::read_to_string(&files[0]).unwrap();
        assert!(svg.contains("No telemetry"));
    }
}
