//! 生成任务状态机
//!
//! 所有状态迁移都经过 [`transition`]，各阶段不再各自判断状态字符串。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::{QuizError, QuizResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "pending_ocr")]
    PendingOcr,
    #[serde(rename = "processed")]
    Processed,
    #[serde(rename = "generating-metrics")]
    GeneratingMetrics,
    #[serde(rename = "pending-generation")]
    PendingGeneration,
    #[serde(rename = "generating-content")]
    GeneratingContent,
    #[serde(rename = "pending-review", alias = "review_pending")]
    PendingReview,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::PendingOcr,
        JobStatus::Processed,
        JobStatus::GeneratingMetrics,
        JobStatus::PendingGeneration,
        JobStatus::GeneratingContent,
        JobStatus::PendingReview,
        JobStatus::Complete,
        JobStatus::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::PendingOcr => "pending_ocr",
            JobStatus::Processed => "processed",
            JobStatus::GeneratingMetrics => "generating-metrics",
            JobStatus::PendingGeneration => "pending-generation",
            JobStatus::GeneratingContent => "generating-content",
            JobStatus::PendingReview => "pending-review",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    /// 出错后重试应恢复到的稳定状态
    pub fn resume_point(self) -> JobStatus {
        match self {
            JobStatus::GeneratingMetrics => JobStatus::Processed,
            JobStatus::GeneratingContent => JobStatus::PendingGeneration,
            other => other,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QuizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "review_pending" {
            return Ok(JobStatus::PendingReview);
        }
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| QuizError::Internal(format!("未知任务状态: {}", s)))
    }
}

/// 驱动状态迁移的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    OcrSucceeded,
    RequestMetrics,
    MetricsReady,
    StartGeneration,
    ContentStaged,
    Approve,
    Fail,
    Retry,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobAction::OcrSucceeded => "ocr-succeeded",
            JobAction::RequestMetrics => "request-metrics",
            JobAction::MetricsReady => "metrics-ready",
            JobAction::StartGeneration => "start-generation",
            JobAction::ContentStaged => "content-staged",
            JobAction::Approve => "approve",
            JobAction::Fail => "fail",
            JobAction::Retry => "retry",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    To(JobStatus),
    /// 回到出错前的稳定状态
    Resume,
}

use JobAction as A;
use JobStatus as S;

const TRANSITIONS: &[(JobStatus, JobAction, Target)] = &[
    (S::PendingOcr, A::OcrSucceeded, Target::To(S::Processed)),
    (S::Processed, A::RequestMetrics, Target::To(S::GeneratingMetrics)),
    (S::GeneratingMetrics, A::MetricsReady, Target::To(S::PendingGeneration)),
    (S::PendingGeneration, A::StartGeneration, Target::To(S::GeneratingContent)),
    (S::GeneratingContent, A::ContentStaged, Target::To(S::PendingReview)),
    (S::PendingReview, A::Approve, Target::To(S::Complete)),
    (S::PendingOcr, A::Fail, Target::To(S::Error)),
    (S::Processed, A::Fail, Target::To(S::Error)),
    (S::GeneratingMetrics, A::Fail, Target::To(S::Error)),
    (S::PendingGeneration, A::Fail, Target::To(S::Error)),
    (S::GeneratingContent, A::Fail, Target::To(S::Error)),
    (S::PendingReview, A::Fail, Target::To(S::Error)),
    (S::Error, A::Retry, Target::Resume),
];

/// 查表得到下一个状态；非法迁移返回 `FailedPrecondition`
pub fn transition(from: JobStatus, action: JobAction, resume: JobStatus) -> QuizResult<JobStatus> {
    let target = TRANSITIONS
        .iter()
        .find(|(status, act, _)| *status == from && *act == action)
        .map(|(_, _, target)| *target)
        .ok_or_else(|| {
            QuizError::FailedPrecondition(format!("任务状态为 {}，不允许执行 {}", from, action))
        })?;

    match target {
        Target::To(next) => Ok(next),
        Target::Resume => match resume {
            S::PendingOcr | S::Processed | S::PendingGeneration | S::PendingReview => Ok(resume),
            _ => Ok(S::Processed),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_every_stage() {
        let steps = [
            (A::OcrSucceeded, S::Processed),
            (A::RequestMetrics, S::GeneratingMetrics),
            (A::MetricsReady, S::PendingGeneration),
            (A::StartGeneration, S::GeneratingContent),
            (A::ContentStaged, S::PendingReview),
            (A::Approve, S::Complete),
        ];
        let mut status = S::PendingOcr;
        for (action, expected) in steps {
            status = transition(status, action, S::Processed).unwrap();
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn complete_is_terminal() {
        for action in [A::Fail, A::Retry, A::Approve, A::RequestMetrics] {
            assert!(transition(S::Complete, action, S::Processed).is_err());
        }
    }

    #[test]
    fn error_reachable_from_every_non_terminal_state() {
        for status in JobStatus::ALL {
            let result = transition(status, A::Fail, S::Processed);
            match status {
                S::Complete | S::Error => assert!(result.is_err(), "{status} should not fail"),
                _ => assert_eq!(result.unwrap(), S::Error),
            }
        }
    }

    #[test]
    fn retry_returns_to_resume_point() {
        assert_eq!(transition(S::Error, A::Retry, S::Processed).unwrap(), S::Processed);
        assert_eq!(transition(S::Error, A::Retry, S::PendingReview).unwrap(), S::PendingReview);
        assert_eq!(S::GeneratingContent.resume_point(), S::PendingGeneration);
        assert_eq!(S::GeneratingMetrics.resume_point(), S::Processed);
    }

    #[test]
    fn mismatched_precondition_is_failed_precondition() {
        let err = transition(S::Processed, A::Approve, S::Processed).unwrap_err();
        assert_eq!(err.code(), "FAILED_PRECONDITION");
    }

    #[test]
    fn status_strings_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!("review_pending".parse::<JobStatus>().unwrap(), S::PendingReview);
        let json = serde_json::to_string(&S::PendingOcr).unwrap();
        assert_eq!(json, "\"pending_ocr\"");
    }
}
