use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::PerformanceRecord;

/// Minimum number of historical records before a trend is fitted.
pub const MIN_TREND_HISTORY: usize = 3;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LearningStyle {
    TestOriented,
    ProjectBased,
    Interactive,
    Balanced,
}

impl fmt::Display for LearningStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LearningStyle::TestOriented => "Test-oriented learner",
            LearningStyle::ProjectBased => "Project-based learner",
            LearningStyle::Interactive => "Interactive learner",
            LearningStyle::Balanced => "Balanced learner",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PerformanceTrend {
    StrongUpward,
    SlightImprovement,
    SlightDecline,
    SignificantDecline,
    InsufficientData,
}

impl PerformanceTrend {
    pub fn from_slope(slope: f64) -> Self {
        if slope > 2.0 {
            PerformanceTrend::StrongUpward
        } else if slope > 0.0 {
            PerformanceTrend::SlightImprovement
        } else if slope > -2.0 {
            PerformanceTrend::SlightDecline
        } else {
            PerformanceTrend::SignificantDecline
        }
    }
}

impl fmt::Display for PerformanceTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PerformanceTrend::StrongUpward => "Strong upward trend in performance",
            PerformanceTrend::SlightImprovement => "Slight improvement in performance",
            PerformanceTrend::SlightDecline => "Slight decline in performance",
            PerformanceTrend::SignificantDecline => "Significant decline in performance",
            PerformanceTrend::InsufficientData => "Insufficient data for trend prediction",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Recommendation {
    pub area: String,
    pub text: String,
    pub priority: Priority,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Insight {
    pub learning_style: LearningStyle,
    pub performance_trend: PerformanceTrend,
    pub recommendations: Vec<Recommendation>,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
}

struct Rule {
    metric: fn(&PerformanceRecord) -> f64,
    below: f64,
    area: &'static str,
    text: &'static str,
    priority: Priority,
    weakness: &'static str,
}

struct Strength {
    metric: fn(&PerformanceRecord) -> f64,
    at_least: f64,
    label: &'static str,
}

const RULES: [Rule; 4] = [
    Rule {
        metric: |r| r.quiz_average,
        below: 70.0,
        area: "Quiz Performance",
        text: "Consider spending more time reviewing course materials before quizzes",
        priority: Priority::High,
        weakness: "Quiz performance needs improvement",
    },
    Rule {
        metric: |r| r.assignment_average,
        below: 70.0,
        area: "Assignment Completion",
        text: "Start assignments earlier and seek help when needed",
        priority: Priority::High,
        weakness: "Assignment completion rate could be better",
    },
    Rule {
        metric: |r| r.attendance_rate,
        below: 80.0,
        area: "Attendance",
        text: "Improve class attendance to better understand course materials",
        priority: Priority::Medium,
        weakness: "Attendance needs improvement",
    },
    Rule {
        metric: |r| r.participation_score,
        below: 60.0,
        area: "Class Participation",
        text: "Increase engagement in class discussions and activities",
        priority: Priority::Medium,
        weakness: "Class participation could be increased",
    },
];

const STRENGTHS: [Strength; 4] = [
    Strength {
        metric: |r| r.quiz_average,
        at_least: 80.0,
        label: "Strong quiz performance",
    },
    Strength {
        metric: |r| r.assignment_average,
        at_least: 80.0,
        label: "Consistent assignment completion",
    },
    Strength {
        metric: |r| r.attendance_rate,
        at_least: 90.0,
        label: "Excellent attendance record",
    },
    Strength {
        metric: |r| r.participation_score,
        at_least: 80.0,
        label: "Active class participation",
    },
];

/// Slope of the least-squares line through `(index, value)`. 0 for fewer than two points.
pub fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = values.iter().sum::<f64>() / n as f64;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });

    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InsightGenerator;

impl InsightGenerator {
    pub fn new() -> Self {
        InsightGenerator
    }

    pub fn identify_learning_style(&self, record: &PerformanceRecord) -> LearningStyle {
        let quiz = record.quiz_average;
        let assignment = record.assignment_average;
        let participation = record.participation_score;

        if quiz > assignment && quiz > participation {
            LearningStyle::TestOriented
        } else if assignment > quiz && assignment > participation {
            LearningStyle::ProjectBased
        } else if participation > quiz && participation > assignment {
            LearningStyle::Interactive
        } else {
            LearningStyle::Balanced
        }
    }

    /// `history` must be in chronological order, oldest first.
    pub fn predict_trend(&self, history: &[PerformanceRecord]) -> PerformanceTrend {
        if history.len() < MIN_TREND_HISTORY {
            return PerformanceTrend::InsufficientData;
        }
        let grades: Vec<f64> = history.iter().map(|r| r.overall_grade).collect();
        PerformanceTrend::from_slope(least_squares_slope(&grades))
    }

    pub fn recommendations(&self, record: &PerformanceRecord) -> Vec<Recommendation> {
        RULES
            .iter()
            .filter(|rule| (rule.metric)(record) < rule.below)
            .map(|rule| Recommendation {
                area: rule.area.to_string(),
                text: rule.text.to_string(),
                priority: rule.priority,
            })
            .collect()
    }

    pub fn strengths(&self, record: &PerformanceRecord) -> Vec<String> {
        STRENGTHS
            .iter()
            .filter(|s| (s.metric)(record) >= s.at_least)
            .map(|s| s.label.to_string())
            .collect()
    }

    pub fn areas_for_improvement(&self, record: &PerformanceRecord) -> Vec<String> {
        RULES
            .iter()
            .filter(|rule| (rule.metric)(record) < rule.below)
            .map(|rule| rule.weakness.to_string())
            .collect()
    }

    pub fn generate_report(
        &self,
        current: &PerformanceRecord,
        history: &[PerformanceRecord],
    ) -> Insight {
        Insight {
            learning_style: self.identify_learning_style(current),
            performance_trend: self.predict_trend(history),
            recommendations: self.recommendations(current),
            strengths: self.strengths(current),
            areas_for_improvement: self.areas_for_improvement(current),
        }
    }
}
