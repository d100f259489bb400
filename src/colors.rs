/// Color support with NO_COLOR and CLICOLOR environment variable handling
///
/// - `NO_COLOR`: if set (to any value), disable colors
/// - `CLICOLOR`: if set to 0, disable colors
/// - `CLICOLOR_FORCE`: if set to non-zero, force colors even when not a TTY
///
/// Otherwise colors are used only when stdout is a terminal.
use colored::control;

/// Decide whether to color, given the relevant environment and TTY state
fn colors_enabled(
    no_color: bool,
    clicolor_force: Option<&str>,
    clicolor: Option<&str>,
    is_tty: bool,
) -> bool {
    if no_color {
        return false;
    }
    if clicolor_force.is_some_and(|v| v != "0") {
        return true;
    }
    if clicolor == Some("0") {
        return false;
    }
    is_tty
}

/// Configure color output for the whole program; call early in main()
pub fn init_colors() {
    let force = std::env::var("CLICOLOR_FORCE").ok();
    let clicolor = std::env::var("CLICOLOR").ok();
    let enabled = colors_enabled(
        std::env::var_os("NO_COLOR").is_some(),
        force.as_deref(),
        clicolor.as_deref(),
        std::io::IsTerminal::is_terminal(&std::io::stdout()),
    );
    control::set_override(enabled);
}
