//! CSSOM style sheets
//!
//! A rule list per `<style>` element. Grouping rules (`@media`, `@supports`)
//! hold nested rule lists addressed by an index path.

use crate::{DomError, NodeKey};

/// CSS rule; `rules` is non-empty only for grouping rules
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CssRule {
    pub text: String,
    pub rules: Vec<CssRule>,
}

impl CssRule {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rules: Vec::new(),
        }
    }

    /// Grouping rule with a prelude such as `@media (min-width: 10px)`
    pub fn grouping(prelude: impl Into<String>, rules: Vec<CssRule>) -> Self {
        Self {
            text: prelude.into(),
            rules,
        }
    }

    pub fn css_text(&self) -> String {
        if self.rules.is_empty() {
            return self.text.clone();
        }
        let inner: Vec<String> = self.rules.iter().map(CssRule::css_text).collect();
        format!("{} {{ {} }}", self.text, inner.join(" "))
    }
}

/// Style sheet attached to a `<style>` element
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CssStyleSheet {
    pub rules: Vec<CssRule>,
}

impl CssStyleSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialized text of every rule
    pub fn css_text(&self) -> String {
        self.rules
            .iter()
            .map(CssRule::css_text)
            .collect::<Vec<_>>()
            .join("")
    }

    fn rule_list_mut(&mut self, path: &[usize]) -> Result<&mut Vec<CssRule>, DomError> {
        let mut list = &mut self.rules;
        for &index in path {
            let len = list.len();
            list = &mut list
                .get_mut(index)
                .ok_or(DomError::IndexSize { index, len })?
                .rules;
        }
        Ok(list)
    }

    /// Insert a rule into the list addressed by `path`
    pub fn insert_rule(&mut self, path: &[usize], rule: CssRule, index: usize) -> Result<usize, DomError> {
        let list = self.rule_list_mut(path)?;
        if index > list.len() {
            return Err(DomError::IndexSize {
                index,
                len: list.len(),
            });
        }
        list.insert(index, rule);
        Ok(index)
    }

    /// Delete a rule from the list addressed by `path`
    pub fn delete_rule(&mut self, path: &[usize], index: usize) -> Result<CssRule, DomError> {
        let list = self.rule_list_mut(path)?;
        if index >= list.len() {
            return Err(DomError::IndexSize {
                index,
                len: list.len(),
            });
        }
        Ok(list.remove(index))
    }
}

/// CSSOM edit notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSheetChange {
    /// `<style>` element owning the sheet
    pub owner: NodeKey,
    pub kind: StyleSheetChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSheetChangeKind {
    Insert {
        path: Vec<usize>,
        index: usize,
        rule: String,
    },
    Delete {
        path: Vec<usize>,
        index: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_delete() {
        let mut sheet = CssStyleSheet::new();
        sheet.insert_rule(&[], CssRule::new("a { color: red; }"), 0).unwrap();
        sheet.insert_rule(&[], CssRule::new("b { color: blue; }"), 0).unwrap();
        assert_eq!(sheet.css_text(), "b { color: blue; }a { color: red; }");

        let removed = sheet.delete_rule(&[], 1).unwrap();
        assert_eq!(removed.text, "a { color: red; }");
    }

    #[test]
    fn test_nested_path() {
        let mut sheet = CssStyleSheet::new();
        sheet
            .insert_rule(&[], CssRule::grouping("@media screen", vec![]), 0)
            .unwrap();
        sheet.insert_rule(&[0], CssRule::new("p { margin: 0; }"), 0).unwrap();
        assert_eq!(sheet.css_text(), "@media screen { p { margin: 0; } }");
    }

    #[test]
    fn test_index_out_of_range() {
        let mut sheet = CssStyleSheet::new();
        assert_eq!(
            sheet.insert_rule(&[], CssRule::new("a {}"), 2),
            Err(DomError::IndexSize { index: 2, len: 0 })
        );
        assert!(sheet.delete_rule(&[3], 0).is_err());
    }
}
