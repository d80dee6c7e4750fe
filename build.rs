//! Renders the `clc.1` man page into `OUT_DIR`.
//!
//! Besides the sections clap-mangen derives from the parser, the page lists
//! the environment variables and files the account configuration is read
//! from, since none of them appear as command-line options.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};

use camino::Utf8PathBuf;
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

/// Variables read by the account configuration, with their meaning.
const ENVIRONMENT: &[(&str, &str)] = &[
    ("CLC_V2_API_USERNAME", "API username exchanged for a bearer token."),
    ("CLC_V2_API_PASSWD", "Password for CLC_V2_API_USERNAME."),
    ("CLC_V2_API_TOKEN", "Pre-issued bearer token; requires CLC_ACCT_ALIAS."),
    ("CLC_ACCT_ALIAS", "Account alias used in API paths."),
    ("CLC_LOCATION", "Default datacenter for modules that take a location."),
    ("CLC_V2_API_URL", "API endpoint, https://api.ctl.io/v2 unless set."),
    ("CLC_POLL_INTERVAL_SECS", "Seconds between operation status polls."),
    ("CLC_MAX_POLLS", "Status polls allowed per asynchronous operation."),
    ("CLC_CONFIG_PATH", "Explicit configuration file, skipping discovery."),
    ("RUST_LOG", "Log filter for diagnostics on standard error; warn by default."),
];

/// Configuration files searched when `CLC_CONFIG_PATH` is unset.
const FILES: &[(&str, &str)] = &[
    ("./clc.toml", "Project configuration."),
    ("~/.clc.toml", "Per-user dotfile."),
    ("$XDG_CONFIG_HOME/clc/clc.toml", "Per-user configuration directory."),
];

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = Utf8PathBuf::from(env::var("OUT_DIR")?);
    let page = render_page()?;
    fs::write(out_dir.join("clc.1"), page)?;
    Ok(())
}

fn render_page() -> Result<Vec<u8>, Box<dyn Error>> {
    let man = Man::new(Cli::command())
        .title("CLC")
        .section("1")
        .manual("CenturyLink Cloud modules");

    let mut page = Vec::new();
    man.render(&mut page)?;
    page.extend_from_slice(tagged_section("ENVIRONMENT", ENVIRONMENT).as_bytes());
    page.extend_from_slice(tagged_section("FILES", FILES).as_bytes());
    Ok(page)
}

/// Formats `entries` as a roff section of tagged paragraphs.
fn tagged_section(heading: &str, entries: &[(&str, &str)]) -> String {
    let mut roff = format!(".SH {heading}\n");
    for (tag, text) in entries {
        roff.push_str(&format!(".TP\n\\fB{}\\fR\n{}\n", escape(tag), escape(text)));
    }
    roff
}

/// Escapes characters roff would otherwise interpret.
fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('-', "\\-")
}
