//! Combinators for building generators out of smaller ones.

use crate::key::{KeyContext, KeyGenerator};

/// Join two generators' keys as `"{first}{separator}{second}"`.
///
/// Yields `None` if either part is missing.
#[derive(Debug, Clone)]
pub struct CompositeKey<K1, K2> {
    first: K1,
    second: K2,
    separator: &'static str,
    name: &'static str,
}

impl<K1, K2> CompositeKey<K1, K2> {
    /// Create a new composite key with default separator `:`.
    pub fn new(first: K1, second: K2) -> Self {
        Self::with_separator(first, second, ":")
    }

    /// Create a new composite key with custom separator.
    pub fn with_separator(first: K1, second: K2, separator: &'static str) -> Self {
        Self {
            first,
            second,
            separator,
            name: "composite",
        }
    }

    /// Override the name reported for logging.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<K1, K2> KeyGenerator for CompositeKey<K1, K2>
where
    K1: KeyGenerator,
    K2: KeyGenerator,
{
    fn generate(&self, ctx: &KeyContext<'_>) -> Option<String> {
        let k1 = self.first.generate(ctx)?;
        let k2 = self.second.generate(ctx)?;
        Some(format!("{}{}{}", k1, self.separator, k2))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Use the primary generator if it yields a key, otherwise the fallback.
#[derive(Debug, Clone)]
pub struct EitherKey<K1, K2> {
    primary: K1,
    fallback: K2,
    name: &'static str,
}

impl<K1, K2> EitherKey<K1, K2> {
    /// Create a new either key.
    pub fn new(primary: K1, fallback: K2) -> Self {
        Self {
            primary,
            fallback,
            name: "either",
        }
    }

    /// Override the name reported for logging.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<K1, K2> KeyGenerator for EitherKey<K1, K2>
where
    K1: KeyGenerator,
    K2: KeyGenerator,
{
    fn generate(&self, ctx: &KeyContext<'_>) -> Option<String> {
        self.primary
            .generate(ctx)
            .or_else(|| self.fallback.generate(ctx))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
