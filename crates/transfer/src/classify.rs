//! Downloader output classification.
//!
//! The downloader reports problems as human-readable text, not exit codes,
//! so the outcome of a failed run is decided by scanning its (lowercased)
//! output against ordered indicator groups. Groups are checked in table
//! order and the first group with a match wins, so a configuration problem
//! outranks everything else in the same output.

use derive_more::Display;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credentials or account state are wrong; nothing else will succeed
    /// until a human fixes them.
    #[display("configuration")]
    Configuration,
    /// Non-zero exit that matched no known indicator.
    #[display("unrecognized")]
    Unrecognized,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    #[display("success")]
    Success,
    /// The item can never be downloaded (deleted, paywalled). Record it as
    /// done so it isn't attempted again.
    #[display("should-skip")]
    ShouldSkip,
    /// Transient failure; try again after a delay.
    #[display("retry")]
    Retry,
    #[display("failure ({_0})")]
    Failure(FailureKind),
}

const CONFIGURATION: &[&str] = &[
    "启用了严格校验大会员或登录模式，请检查 sessdata 或大会员状态",
    "请检查 sessdata",
    "cookie 无效",
    "登录失败",
    "身份验证失败",
];

const SKIP: &[&str] = &[
    "尚不支持 dash 格式",
    "该视频（bvid:",
    "视频不存在",
    "稿件不可见",
    "已删除",
    "无法访问",
    "权限不足",
    "需要付费",
    "会员专享",
    "充电专享",
];

const RETRY: &[&str] = &[
    "网络错误",
    "连接超时",
    "请求失败",
    "下载失败",
    "separator is not found",
    "chunk exceed the limit",
    "connection reset",
    "timeout",
    "temporary failure",
    "无法连接",
    "网络不可达",
    "服务器错误",
    "503 service unavailable",
    "502 bad gateway",
    "504 gateway timeout",
];

const TABLE: [(Outcome, &[&str]); 3] = [
    (Outcome::Failure(FailureKind::Configuration), CONFIGURATION),
    (Outcome::ShouldSkip, SKIP),
    (Outcome::Retry, RETRY),
];

/// Result of classifying one run, with the indicator that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub outcome: Outcome,
    pub indicator: Option<&'static str>,
}

/// Classifies a finished run. `exit_code` is `None` when the process was
/// killed by a signal.
pub fn classify<S: AsRef<str>>(exit_code: Option<i32>, output: &[S]) -> Classification {
    if exit_code == Some(0) {
        return Classification {
            outcome: Outcome::Success,
            indicator: None,
        };
    }
    let text = output.iter().map(|line| line.as_ref().to_lowercase()).collect::<Vec<_>>().join("\n");
    for (outcome, indicators) in TABLE {
        if let Some(indicator) = indicators.iter().find(|indicator| text.contains(*indicator)) {
            return Classification {
                outcome,
                indicator: Some(*indicator),
            };
        }
    }
    Classification {
        outcome: Outcome::Failure(FailureKind::Unrecognized),
        indicator: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(0), &["ERROR: 下载失败"], Outcome::Success)]
    #[case(Some(1), &["[ERROR] 请检查 SESSDATA 是否正确"], Outcome::Failure(FailureKind::Configuration))]
    #[case(Some(1), &["该视频（bvid: BV1xx）为充电专享视频"], Outcome::ShouldSkip)]
    #[case(Some(1), &["稿件不可见"], Outcome::ShouldSkip)]
    #[case(Some(1), &["Connection Reset by peer"], Outcome::Retry)]
    #[case(Some(1), &["HTTP 502 Bad Gateway"], Outcome::Retry)]
    #[case(Some(2), &["something odd happened"], Outcome::Failure(FailureKind::Unrecognized))]
    #[case(None, &[], Outcome::Failure(FailureKind::Unrecognized))]
    fn test_classify(#[case] exit_code: Option<i32>, #[case] output: &[&str], #[case] expected: Outcome) {
        assert_eq!(classify(exit_code, output).outcome, expected);
    }

    #[test]
    fn test_configuration_beats_retry() {
        let output = ["网络错误, retrying", "登录失败"];
        let classification = classify(Some(1), &output);
        assert_eq!(classification.outcome, Outcome::Failure(FailureKind::Configuration));
        assert_eq!(classification.indicator, Some("登录失败"));
    }

    #[test]
    fn test_skip_beats_retry() {
        let output = ["timeout while probing", "视频不存在"];
        assert_eq!(classify(Some(1), &output).outcome, Outcome::ShouldSkip);
    }
}
