use serde::Serialize;

/// Height of one student's grade chart on the page, in PDF points.
pub const DRAWING_HEIGHT: i64 = 200;

/// Plot area inside the drawing.
pub const PLOT_X: i64 = 50;
pub const PLOT_Y: i64 = 50;
pub const PLOT_WIDTH: i64 = 300;
pub const PLOT_HEIGHT: i64 = 125;

/// Grades are always plotted on a 0-100 value axis.
pub const AXIS_MIN: f64 = 0.0;
pub const AXIS_MAX: f64 = 100.0;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendColor {
    Green,
    Red,
}

impl TrendColor {
    /// Integer RGB components (0 or 1) for PDF colour operators.
    pub fn rgb(&self) -> [i64; 3] {
        match self {
            TrendColor::Green => [0, 1, 0],
            TrendColor::Red => [1, 0, 0],
        }
    }
}

/// Straight line from the first to the last grade.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct TrendLine {
    pub from: (i64, i64),
    pub to: (i64, i64),
    pub color: TrendColor,
}

/// Grade history laid out in drawing coordinates (origin bottom-left).
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TrendChart {
    pub labels: Vec<String>,
    pub grades: Vec<f64>,
    pub points: Vec<(i64, i64)>,
    pub overlay: Option<TrendLine>,
}

impl TrendChart {
    pub fn new(grades: &[f64]) -> Self {
        let labels = (1..=grades.len()).map(|i| format!("Term {i}")).collect();
        let points: Vec<(i64, i64)> = grades
            .iter()
            .enumerate()
            .map(|(i, grade)| (x_at(i, grades.len()), y_at(*grade)))
            .collect();

        let overlay = match (grades.first(), grades.last(), points.first(), points.last()) {
            (Some(first), Some(last), Some(from), Some(to)) if grades.len() >= 2 => Some(TrendLine {
                from: *from,
                to: *to,
                color: if last >= first {
                    TrendColor::Green
                } else {
                    TrendColor::Red
                },
            }),
            _ => None,
        };

        TrendChart {
            labels,
            grades: grades.to_vec(),
            points,
            overlay,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn x_at(index: usize, count: usize) -> i64 {
    if count <= 1 {
        return PLOT_X + PLOT_WIDTH / 2;
    }
    let step = PLOT_WIDTH as f64 / (count - 1) as f64;
    PLOT_X + (index as f64 * step).round() as i64
}

fn y_at(grade: f64) -> i64 {
    let clamped = grade.clamp(AXIS_MIN, AXIS_MAX);
    let share = (clamped - AXIS_MIN) / (AXIS_MAX - AXIS_MIN);
    PLOT_Y + (share * PLOT_HEIGHT as f64).round() as i64
}
