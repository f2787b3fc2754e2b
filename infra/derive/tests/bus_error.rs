use std::borrow::Cow;
use std::error::Error as _;
use tbus_derive::bus_error;

mod store {
    use super::*;

    #[bus_error]
    pub enum StoreError {
        #[error("IO error{}: {source}", format_context(.context))]
        Io { source: std::io::Error, context: Option<Cow<'static, str>> },

        #[error("Parse error{}: {reason}", format_context(.context))]
        Parse {
            #[source]
            reason: std::num::ParseIntError,
            context: Option<Cow<'static, str>>,
        },

        #[error("Not found{}: {message}", format_context(.context))]
        NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

        #[error("Poisoned: {message}")]
        Poisoned { message: Cow<'static, str> },
    }
}

mod already_derived {
    use super::*;

    #[bus_error]
    #[derive(Debug, thiserror::Error)]
    pub enum QuietError {
        #[error("Quiet{}: {message}", format_context(.context))]
        Quiet { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
    }
}

use already_derived::QuietError;
use store::{StoreError, StoreErrorExt};

fn read_missing() -> Result<String, StoreError> {
    let text = std::fs::read_to_string("/definitely/not/here").context("Reading fixture")?;
    Ok(text)
}

fn parse(input: &str) -> Result<u32, StoreError> {
    Ok(input.parse::<u32>()?)
}

#[test]
fn source_conversion_keeps_context() {
    let err = read_missing().unwrap_err();

    assert!(matches!(err, StoreError::Io { ref context, .. } if context.as_deref() == Some("Reading fixture")));
    assert!(err.to_string().starts_with("IO error (Reading fixture): "));
    assert!(err.source().is_some());
}

#[test]
fn from_impl_enables_question_mark() {
    let err = parse("nope").unwrap_err();

    assert!(matches!(err, StoreError::Parse { context: None, .. }));
    assert!(err.to_string().starts_with("Parse error: "));
}

#[test]
fn context_replaces_existing_context() {
    let result: Result<(), StoreError> =
        Err(StoreError::NotFound { message: "user 7".into(), context: Some("first".into()) });

    let err = result.context("second").unwrap_err();

    assert_eq!(err.to_string(), "Not found (second): user 7");
}

#[test]
fn variants_without_context_are_left_alone() {
    let result: Result<(), StoreError> = Err(StoreError::Poisoned { message: "cache".into() });

    let err = result.context("ignored").unwrap_err();

    assert_eq!(err.to_string(), "Poisoned: cache");
}

#[test]
fn existing_derives_are_not_duplicated() {
    let err = QuietError::Quiet { message: "shh".into(), context: None };

    assert_eq!(err.to_string(), "Quiet: shh");
    assert!(format!("{err:?}").contains("Quiet"));
}
