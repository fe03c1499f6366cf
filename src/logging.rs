use colored::{Color, ColoredString, Colorize};
use log::Level;

/// The crates of this workspace, with the tag and color their lines are printed with
const WORKSPACE_CRATES: [(&str, &str, Color); 4] = [
    ("jukebox", "JUKEBOX", Color::BrightCyan),
    ("jukebox_core", "CORE", Color::Blue),
    ("jukebox_collab", "COLLAB", Color::BrightMagenta),
    ("jukebox_server", "SERVER", Color::BrightGreen),
];

/// Installs the logger. With `verbose`, debug lines of the workspace crates are shown too.
pub fn init_logger(verbose: bool) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            let now = chrono::Local::now();

            out.finish(format_args!(
                "{:^5} {} {:^8} {}",
                level_badge(record.level()),
                now.format("%H:%M:%S").to_string().bright_black(),
                source_tag(record.target()),
                message
            ))
        })
        .filter(move |meta| is_shown(meta.level(), is_workspace(meta.target()), verbose))
        .chain(std::io::stdout())
        .apply()
}

fn crate_of(target: &str) -> &str {
    target.split("::").next().unwrap_or_default()
}

fn is_workspace(target: &str) -> bool {
    let name = crate_of(target);
    WORKSPACE_CRATES.iter().any(|(krate, ..)| *krate == name)
}

/// Dependencies only get to print warnings and errors
fn is_shown(level: Level, from_workspace: bool, verbose: bool) -> bool {
    match level {
        Level::Error | Level::Warn => true,
        Level::Info => from_workspace,
        Level::Debug => from_workspace && verbose,
        Level::Trace => false,
    }
}

fn source_tag(target: &str) -> ColoredString {
    let name = crate_of(target);

    WORKSPACE_CRATES
        .iter()
        .find(|(krate, ..)| *krate == name)
        .map(|(_, tag, color)| tag.color(*color))
        .unwrap_or_else(|| name.clear())
}

fn level_badge(level: Level) -> ColoredString {
    match level {
        Level::Error => " ERR ".black().on_red().bold(),
        Level::Warn => " WRN ".black().on_yellow().bold(),
        Level::Info => " INF ".black().on_blue().bold(),
        Level::Debug => " DBG ".white().on_black(),
        Level::Trace => " TRC ".clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_are_tagged_by_crate() {
        assert!(source_tag("jukebox_collab::rooms").to_string().contains("COLLAB"));
        assert!(source_tag("jukebox").to_string().contains("JUKEBOX"));
        assert!(source_tag("sqlx::query").to_string().contains("sqlx"));
    }

    #[test]
    fn test_dependencies_only_print_problems() {
        assert!(is_shown(Level::Warn, false, false));
        assert!(!is_shown(Level::Info, false, true));
        assert!(is_shown(Level::Info, true, false));
        assert!(!is_shown(Level::Debug, true, false), "Debug needs verbose");
        assert!(is_shown(Level::Debug, true, true));
        assert!(is_workspace("jukebox_server::sse"));
        assert!(!is_workspace("jukeboxer"));
    }
}
