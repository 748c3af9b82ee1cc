/*
 * selfcheck.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Example-based checks of the engine, runnable from the command line.

use crate::namespace::Namespace;
use crate::template::Template;
use serde_json::json;

/// One example template and the output it must produce.
#[derive(Debug, Clone, Copy)]
pub struct Check {
    pub name: &'static str,
    pub source: &'static str,
    pub expected: &'static str,
}

const CHECKS: &[Check] = &[
    Check {
        name: "literal text",
        source: "no delimiters here\n",
        expected: "no delimiters here",
    },
    Check {
        name: "expression",
        source: "Hello {# name #}!",
        expected: "Hello world!",
    },
    Check {
        name: "function definition",
        source: "{# function f() return 42 end #}The answer is: {# f() #}",
        expected: "The answer is: 42",
    },
    Check {
        name: "table loop",
        source: "{% for i in {1, 2, 3} %}{# i #},{% end %}",
        expected: "1,2,3,",
    },
    Check {
        name: "conditional chain",
        source: "{% if false %}a{% elif true %}b{% else %}c{% end %}",
        expected: "b",
    },
    Check {
        name: "emission toggle",
        source: "1{# set_emit_enable(false) #}2{# set_emit_enable(true) #}3",
        expected: "13",
    },
    Check {
        name: "nested blocks",
        source: "{% for i = 0, 1 %}{% if i == 1 %}{# i #}{% end %}{% end %}",
        expected: "1",
    },
    Check {
        name: "multi-line fragment",
        source: "{#\n    local parts = {}\n    for i = 1, 3 do\n        parts[i] = i * i\n    end\n    squares = table.concat(parts, ' ')\n#}{# squares #}",
        expected: "1 4 9",
    },
    Check {
        name: "whitespace eating",
        source: "{# set_eat_whitespaces(true) #}  a\n    b",
        expected: "a\nb",
    },
];

/// The outcome of one check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: &'static str,
    /// `None` when the check passed; otherwise what went wrong.
    pub failure: Option<String>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Run every check.
pub fn run() -> Vec<CheckOutcome> {
    CHECKS.iter().map(run_check).collect()
}

fn run_check(check: &Check) -> CheckOutcome {
    let namespace = Namespace::new().with("name", json!("world"));
    let failure = match Template::new(check.source).render(namespace) {
        Ok(out) if out == check.expected => None,
        Ok(out) => Some(format!("expected {:?}, got {:?}", check.expected, out)),
        Err(err) => Some(err.to_string()),
    };
    if let Some(failure) = &failure {
        tracing::warn!(check = check.name, "{failure}");
    }
    CheckOutcome {
        name: check.name,
        failure,
    }
}
