//! `${...}` references in output declarations.
//!
//! # Reference Formats
//!
//! - `${system}` - the platform triple being composed
//! - `${inputs.<name>}` - store path of an input (`.path`, `.rev`, `.hash`
//!   select an attribute; `.path` is the default)
//! - `${packages.<name>.src}` - source directory of another package
//!
//! # Shell Variables
//!
//! Any other `${...}` (`${HOME}`, `${out:-x}`) and plain `$VAR` pass through
//! unchanged, so commands keep working as shell scripts.
//!
//! # Escaping
//!
//! `$${` produces a literal `${` that is never treated as a reference.

use thiserror::Error;

/// Attribute selected from an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAttr {
  Path,
  Rev,
  Hash,
}

/// A reference to something known at composition time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
  System,
  Input { name: String, attr: InputAttr },
  PackageSrc(String),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Reference(Reference),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpolateError {
  #[error("unclosed '${{' at position {0}")]
  Unclosed(usize),

  #[error("malformed reference '${{{0}}}'")]
  Malformed(String),

  #[error("unknown attribute '{attr}' in '${{{reference}}}'")]
  UnknownAttribute { reference: String, attr: String },
}

/// Parse `input` into literal text and references.
pub fn parse(input: &str) -> Result<Vec<Segment>, InterpolateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        if let Some((_, '{')) = chars.peek() {
          // Escaped: $${ -> ${
          chars.next();
          literal.push_str("${");
        } else {
          literal.push_str("$$");
        }
      }
      Some((_, '{')) => {
        chars.next();
        let mut content = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            closed = true;
            break;
          }
          content.push(c);
        }
        if !closed {
          return Err(InterpolateError::Unclosed(pos));
        }

        match parse_reference(&content)? {
          Some(reference) => {
            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Reference(reference));
          }
          None => {
            literal.push_str("${");
            literal.push_str(&content);
            literal.push('}');
          }
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }
  Ok(segments)
}

/// `None` for contents that are not ours to interpret.
fn parse_reference(content: &str) -> Result<Option<Reference>, InterpolateError> {
  if content == "system" {
    return Ok(Some(Reference::System));
  }

  let malformed = || InterpolateError::Malformed(content.to_string());
  let unknown_attr = |attr: &str| InterpolateError::UnknownAttribute {
    reference: content.to_string(),
    attr: attr.to_string(),
  };

  if let Some(rest) = content.strip_prefix("inputs.") {
    let mut parts = rest.split('.');
    let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;
    let attr = match parts.next() {
      None | Some("path") => InputAttr::Path,
      Some("rev") => InputAttr::Rev,
      Some("hash") => InputAttr::Hash,
      Some(other) => return Err(unknown_attr(other)),
    };
    if parts.next().is_some() {
      return Err(malformed());
    }
    return Ok(Some(Reference::Input {
      name: name.to_string(),
      attr,
    }));
  }

  if let Some(rest) = content.strip_prefix("packages.") {
    let (name, attr) = rest.split_once('.').ok_or_else(malformed)?;
    if name.is_empty() {
      return Err(malformed());
    }
    if attr != "src" {
      return Err(unknown_attr(attr));
    }
    return Ok(Some(Reference::PackageSrc(name.to_string())));
  }

  Ok(None)
}

/// Every reference in `input`, in order of appearance.
pub fn references(input: &str) -> Result<Vec<Reference>, InterpolateError> {
  Ok(
    parse(input)?
      .into_iter()
      .filter_map(|segment| match segment {
        Segment::Reference(r) => Some(r),
        Segment::Literal(_) => None,
      })
      .collect(),
  )
}
