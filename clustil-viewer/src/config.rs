use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Kernel event stream + JSON memo endpoint
    Api,
    /// socket.io row table + form memo endpoint
    Legacy,
}

/// Clustil viewer - mirrors the fleet state and edits device memos
#[derive(Parser, Debug, Clone)]
#[command(name = "clustil-viewer")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server base URL
    #[arg(long, env = "CLUSTIL_HOST", default_value = "http://localhost:3001")]
    pub host: String,

    /// Data source
    #[arg(long, env = "CLUSTIL_MODE", value_enum, default_value = "api")]
    pub mode: Mode,

    /// Name recorded as editor of memos written from this viewer
    #[arg(long, env = "CLUSTIL_EDITOR")]
    pub editor: Option<String>,

    /// Seconds between state dumps (0 = only on `list`)
    #[arg(long, default_value = "0")]
    pub print_secs: u64,
}

impl Args {
    pub fn stream_url(&self) -> String {
        format!("{}/stream", self.host.trim_end_matches('/'))
    }

    pub fn editor_name(&self) -> Option<String> {
        self.editor
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["clustil-viewer"]).unwrap();
        assert_eq!(args.mode, Mode::Api);
        assert!(args.stream_url().ends_with("/stream"));
    }

    #[test]
    fn flags() {
        let args = Args::try_parse_from([
            "clustil-viewer",
            "--host",
            "http://saige:8080/",
            "--mode",
            "legacy",
            "--editor",
            "  ",
        ])
        .unwrap();
        assert_eq!(args.mode, Mode::Legacy);
        assert_eq!(args.stream_url(), "http://saige:8080/stream");
        assert_eq!(args.editor_name(), None);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Args::try_parse_from(["clustil-viewer", "--mode", "demo"]).is_err());
    }
}
