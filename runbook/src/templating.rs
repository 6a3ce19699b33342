use std::{cell::OnceCell, path::PathBuf};

use indexmap::IndexMap;

use crate::{AppError, fs::read_file_to_string, variables::ValueProvider};

/// A source/destination pair whose contents are substituted through
/// `__NAME__` placeholders. The source is read on first access.
#[derive(Debug)]
pub struct Template {
  source: PathBuf,
  destination: PathBuf,
  content: OnceCell<String>,
}

impl Template {
  pub fn new(source: PathBuf, destination: PathBuf) -> Self {
    Self {
      source,
      destination,
      content: OnceCell::new(),
    }
  }

  pub fn source(&self) -> &PathBuf {
    &self.source
  }

  pub fn destination(&self) -> &PathBuf {
    &self.destination
  }

  pub fn content(&self) -> Result<&str, AppError> {
    if let Some(content) = self.content.get() {
      return Ok(content);
    }

    let loaded = read_file_to_string(&self.source)?;

    Ok(self.content.get_or_init(|| loaded))
  }
}

/// Replaces every `__NAME__` occurrence with the provider's resolved value.
/// Lookup is case-sensitive; unknown placeholders are left as-is, so shell
/// text containing double underscores passes through unharmed. Providers are
/// only resolved when their placeholder actually occurs.
pub fn render(text: &str, values: &IndexMap<String, ValueProvider>) -> Result<String, AppError> {
  let mut rendered = text.to_string();

  for (name, provider) in values {
    let placeholder = format!("__{name}__");

    if rendered.contains(&placeholder) {
      rendered = rendered.replace(&placeholder, &provider.value()?);
    }
  }

  Ok(rendered)
}

#[cfg(test)]
mod tests {
  use indexmap::indexmap;
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn placeholders_are_substituted() -> Result<(), AppError> {
    let values = indexmap! {
      "NAME".to_string() => ValueProvider::simple("world"),
    };

    assert_eq!(render("hello __NAME__!", &values)?, "hello world!");

    Ok(())
  }

  #[test]
  fn rendering_without_placeholders_is_identity() -> Result<(), AppError> {
    let values = indexmap! {
      "NAME".to_string() => ValueProvider::simple("world"),
    };

    let text = "if [ -z \"$__\" ]; then echo __unknown__; fi";

    assert_eq!(render(text, &values)?, text);

    Ok(())
  }

  #[test]
  fn lookup_is_case_sensitive() -> Result<(), AppError> {
    let values = indexmap! {
      "name".to_string() => ValueProvider::simple("lower"),
    };

    assert_eq!(render("__NAME__ __name__", &values)?, "__NAME__ lower");

    Ok(())
  }

  #[test]
  fn unused_providers_are_never_resolved() -> Result<(), AppError> {
    // A failing deferred provider must not be touched when its placeholder
    // does not occur in the text.
    let values = indexmap! {
      "BROKEN".to_string() => ValueProvider::deferred("exit 1"),
      "USED".to_string() => ValueProvider::simple("ok"),
    };

    assert_eq!(render("value: __USED__", &values)?, "value: ok");

    Ok(())
  }

  #[test]
  fn failing_providers_propagate() {
    let values = indexmap! {
      "BROKEN".to_string() => ValueProvider::deferred("exit 1"),
    };

    let result = render("__BROKEN__", &values);

    assert!(matches!(result, Err(AppError::ValueResolution { .. })));
  }
}
