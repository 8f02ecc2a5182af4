//! Built-in event providers and their typed payload views.

pub mod gc;
pub mod universal;
pub mod winsat;

use crate::template::EventTemplate;

/// Templates for every built-in provider, ready to register.
pub fn builtin_templates() -> Vec<EventTemplate> {
    let mut templates = gc::templates();
    templates.extend(universal::templates());
    templates.extend(winsat::templates());
    templates
}
