//! Routers and their handlers, one module per router.

pub mod admin;
pub mod others;
pub mod settings;
pub mod user;

use taskbot::framework::Context;

/// The first whitespace-separated argument after the command, if any.
fn command_arg(ctx: &Context) -> Option<&str> {
    ctx.event()
        .text()?
        .split_whitespace()
        .nth(1)
}

/// Fills `{name}` placeholders in a translated template.
fn fill(template: String, values: &[(&str, &str)]) -> String {
    values.iter().fold(template, |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}
