/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::connection::config::HeartbeatConfig;
use crate::connection::metrics::ConnectionMetrics;

/// Score below which a connection that is still open is torn down and rebuilt.
pub const PREEMPTIVE_RECONNECT_THRESHOLD: u8 = 30;

const FAILED_PROBE_PENALTY: i32 = 10;
const HIGH_LATENCY_PENALTY: i32 = 10;
const ELEVATED_LATENCY_PENALTY: i32 = 5;
const ACTIVITY_BONUS: i32 = 5;
const ACTIVITY_WINDOW: Duration = Duration::from_secs(30);

/// Discrete connection quality shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityGrade {
    /// Score above 90 and mean latency below 100 ms
    Excellent,
    /// Score above 70 and mean latency below 300 ms
    Good,
    /// Score above 40 and mean latency below 1 s
    Poor,
    /// Anything worse than [`QualityGrade::Poor`]
    Critical,
    /// The platform reports no network
    Offline,
}

impl QualityGrade {
    /// Whether the grade warrants warning the user.
    pub fn is_degraded(&self) -> bool {
        matches!(self, QualityGrade::Poor | QualityGrade::Critical)
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityGrade::Excellent => "EXCELLENT",
            QualityGrade::Good => "GOOD",
            QualityGrade::Poor => "POOR",
            QualityGrade::Critical => "CRITICAL",
            QualityGrade::Offline => "OFFLINE",
        };
        write!(f, "{name}")
    }
}

/// Network class reported by the platform. Metered networks probe less often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkClass {
    /// Wi-Fi, ethernet or anything not billed per byte
    #[default]
    Unmetered,
    /// Cellular or otherwise metered
    Metered,
}

/// Facts the assessment needs beyond the metrics themselves.
#[derive(Debug, Clone, Copy)]
pub struct AssessmentContext {
    /// Probes that failed since the previous assessment
    pub new_failed_probes: u32,
    /// Whether the manager is in the open state
    pub connected: bool,
    /// Last reachability hint from the platform
    pub reachable: bool,
    /// Assessment time
    pub now: Instant,
}

/// Result of one assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    /// Grade derived from the new score and mean latency
    pub grade: QualityGrade,
    /// Updated health score
    pub health_score: u8,
    /// The score just fell below [`PREEMPTIVE_RECONNECT_THRESHOLD`] on an open connection
    pub preemptive_reconnect: bool,
}

/// Turns metrics into a grade and a health score.
#[derive(Debug, Default, Clone, Copy)]
pub struct QualityAssessor;

impl QualityAssessor {
    /// Computes the next health score and grade from `metrics`, whose `health_score`
    /// is the previous score.
    pub fn assess(metrics: &ConnectionMetrics, ctx: &AssessmentContext) -> Assessment {
        let previous = metrics.health_score;
        let mean = metrics.mean_latency_ms();

        let mut score = i32::from(previous);
        score -= FAILED_PROBE_PENALTY * ctx.new_failed_probes.min(10) as i32;
        match mean {
            Some(mean) if mean > 1000.0 => score -= HIGH_LATENCY_PENALTY,
            Some(mean) if mean > 500.0 => score -= ELEVATED_LATENCY_PENALTY,
            _ => {}
        }
        let recently_active = metrics
            .last_activity_at
            .is_some_and(|at| ctx.now.saturating_duration_since(at) < ACTIVITY_WINDOW);
        if ctx.connected && recently_active {
            score += ACTIVITY_BONUS;
        }
        let health_score = score.clamp(0, 100) as u8;

        let preemptive_reconnect = ctx.connected
            && previous >= PREEMPTIVE_RECONNECT_THRESHOLD
            && health_score < PREEMPTIVE_RECONNECT_THRESHOLD;

        Assessment {
            grade: Self::grade_for(health_score, mean, ctx.reachable),
            health_score,
            preemptive_reconnect,
        }
    }

    /// Maps a score and mean latency to a grade. Missing latency samples satisfy
    /// every latency condition.
    pub fn grade_for(health_score: u8, mean_latency_ms: Option<f64>, reachable: bool) -> QualityGrade {
        if !reachable {
            return QualityGrade::Offline;
        }
        let below = |limit: f64| mean_latency_ms.is_none_or(|mean| mean < limit);
        if health_score > 90 && below(100.0) {
            QualityGrade::Excellent
        } else if health_score > 70 && below(300.0) {
            QualityGrade::Good
        } else if health_score > 40 && below(1000.0) {
            QualityGrade::Poor
        } else {
            QualityGrade::Critical
        }
    }

    /// Probe interval for the given network class.
    pub fn heartbeat_interval(config: &HeartbeatConfig, class: NetworkClass) -> Duration {
        match class {
            NetworkClass::Unmetered => config.interval,
            NetworkClass::Metered => config.metered_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(new_failed_probes: u32, connected: bool) -> AssessmentContext {
        AssessmentContext {
            new_failed_probes,
            connected,
            reachable: true,
            now: Instant::now(),
        }
    }

    #[test]
    fn test_three_failed_probes_cost_thirty_points() {
        let mut metrics = ConnectionMetrics::default();
        for _ in 0..3 {
            let assessment = QualityAssessor::assess(&metrics, &context(1, true));
            metrics.health_score = assessment.health_score;
        }
        assert_eq!(metrics.health_score, 70);
        assert_eq!(
            QualityAssessor::grade_for(metrics.health_score, None, true),
            QualityGrade::Poor
        );
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(QualityAssessor::grade_for(70, Some(50.0), true), QualityGrade::Poor);
        assert_eq!(QualityAssessor::grade_for(71, Some(50.0), true), QualityGrade::Good);
        assert_eq!(QualityAssessor::grade_for(91, Some(99.0), true), QualityGrade::Excellent);
        assert_eq!(QualityAssessor::grade_for(91, Some(100.0), true), QualityGrade::Good);
        assert_eq!(QualityAssessor::grade_for(95, Some(800.0), true), QualityGrade::Poor);
        assert_eq!(QualityAssessor::grade_for(40, None, true), QualityGrade::Critical);
        assert_eq!(QualityAssessor::grade_for(100, Some(1500.0), true), QualityGrade::Critical);
    }

    #[test]
    fn test_unreachable_overrides_grade() {
        assert_eq!(QualityAssessor::grade_for(100, None, false), QualityGrade::Offline);
    }

    #[test]
    fn test_latency_penalties() {
        let now = Instant::now();
        let mut slow = ConnectionMetrics::default();
        slow.record_latency(1200, now);
        assert_eq!(QualityAssessor::assess(&slow, &context(0, false)).health_score, 90);

        let mut sluggish = ConnectionMetrics::default();
        sluggish.record_latency(600, now);
        assert_eq!(QualityAssessor::assess(&sluggish, &context(0, false)).health_score, 95);
    }

    #[test]
    fn test_recent_activity_bonus_is_clamped() {
        let now = Instant::now();
        let mut metrics = ConnectionMetrics::default();
        metrics.record_received(10, now);
        assert_eq!(QualityAssessor::assess(&metrics, &context(0, true)).health_score, 100);

        metrics.health_score = 50;
        assert_eq!(QualityAssessor::assess(&metrics, &context(0, true)).health_score, 55);
        assert_eq!(QualityAssessor::assess(&metrics, &context(0, false)).health_score, 50);

        let later = AssessmentContext {
            now: now + Duration::from_secs(31),
            ..context(0, true)
        };
        assert_eq!(QualityAssessor::assess(&metrics, &later).health_score, 50);
    }

    #[test]
    fn test_preemptive_reconnect_fires_on_crossing_only() {
        let mut metrics = ConnectionMetrics::default();
        metrics.health_score = 35;
        assert!(QualityAssessor::assess(&metrics, &context(1, true)).preemptive_reconnect);

        metrics.health_score = 25;
        assert!(!QualityAssessor::assess(&metrics, &context(1, true)).preemptive_reconnect);

        metrics.health_score = 35;
        assert!(!QualityAssessor::assess(&metrics, &context(1, false)).preemptive_reconnect);
    }

    #[test]
    fn test_score_never_negative() {
        let mut metrics = ConnectionMetrics::default();
        metrics.health_score = 5;
        let assessment = QualityAssessor::assess(&metrics, &context(3, false));
        assert_eq!(assessment.health_score, 0);
        assert_eq!(assessment.grade, QualityGrade::Critical);
    }

    #[test]
    fn test_heartbeat_interval_by_network_class() {
        let config = HeartbeatConfig::default();
        assert_eq!(
            QualityAssessor::heartbeat_interval(&config, NetworkClass::Unmetered),
            Duration::from_secs(15)
        );
        assert_eq!(
            QualityAssessor::heartbeat_interval(&config, NetworkClass::Metered),
            Duration::from_secs(30)
        );
    }
}
