use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

/// One invocation of the downloader.
///
/// Produces `<url> [-b] -d <output_dir> [-c <credential>] <extra args...>`.
#[derive(Clone)]
pub struct TransferRequest {
    pub url: String,
    /// Absolute directory the downloader writes into.
    pub output_dir: PathBuf,
    /// Download every part/episode behind the URL.
    pub batch: bool,
    pub credential: Option<String>,
    pub extra_args: Vec<String>,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output_dir: output_dir.into(),
            batch: false,
            credential: None,
            extra_args: Vec::new(),
        }
    }

    pub fn batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    pub fn credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.is_empty());
        self
    }

    pub fn extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from(&self.url)];
        if self.batch {
            args.push("-b".into());
        }
        args.push("-d".into());
        args.push(self.output_dir.clone().into_os_string());
        if let Some(credential) = &self.credential {
            args.push("-c".into());
            args.push(credential.into());
        }
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }
}

// Hand-written so the credential never ends up in logs.
impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("url", &self.url)
            .field("output_dir", &self.output_dir)
            .field("batch", &self.batch)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("extra_args", &self.extra_args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let request = TransferRequest::new("https://www.bilibili.com/video/BV1x", "/data/fav/BV1x-Title")
            .batch(true)
            .credential(Some("secret".to_string()))
            .extra_args(vec!["--vip-strict".to_string()]);
        assert_eq!(
            request.args(),
            ["https://www.bilibili.com/video/BV1x", "-b", "-d", "/data/fav/BV1x-Title", "-c", "secret", "--vip-strict"]
                .map(OsString::from)
        );
        assert!(!format!("{request:?}").contains("secret"));
    }

    #[test]
    fn test_minimal_args() {
        let request = TransferRequest::new("https://www.bilibili.com/video/BV1x", "/out").credential(Some(String::new()));
        assert_eq!(request.args(), ["https://www.bilibili.com/video/BV1x", "-d", "/out"].map(OsString::from));
    }
}
