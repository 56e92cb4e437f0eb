//! Branch length literals exactly as written in a newick string.
//!
//! The tree parser only keeps lengths as `f64`, which drops digits past the
//! 17th. This scanner walks the same grammar and keeps the `:<length>` text of
//! every node, in the parser's child order, so lengths can be built as exact
//! decimals.

use std::iter::Peekable;
use std::str::Chars;

use anyhow::{bail, Result};

#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct EdgeLiterals {
    pub length: Option<String>,
    pub children: Vec<EdgeLiterals>,
}

pub(super) fn scan(newick: &str) -> Result<EdgeLiterals> {
    let mut scanner = Scanner {
        chars: newick.chars().peekable(),
    };
    let root = scanner.subtree()?;
    scanner.skip_trivia()?;
    if scanner.chars.peek() == Some(&';') {
        scanner.chars.next();
    }
    Ok(root)
}

struct Scanner<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Scanner<'_> {
    fn skip_trivia(&mut self) -> Result<()> {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else if c == '[' {
                self.chars.next();
                if !self.chars.by_ref().any(|c| c == ']') {
                    bail!("unterminated comment in newick tree");
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn subtree(&mut self) -> Result<EdgeLiterals> {
        self.skip_trivia()?;
        let mut children = Vec::new();
        if self.chars.peek() == Some(&'(') {
            self.chars.next();
            loop {
                children.push(self.subtree()?);
                self.skip_trivia()?;
                match self.chars.next() {
                    Some(',') => continue,
                    Some(')') => break,
                    Some(other) => bail!("expected ',' or ')' in newick tree, found {other:?}"),
                    None => bail!("unbalanced parentheses in newick tree"),
                }
            }
        }

        self.label()?;
        self.skip_trivia()?;
        let length = if self.chars.peek() == Some(&':') {
            self.chars.next();
            self.skip_trivia()?;
            Some(self.take_while(|c| !is_structural(c) && !c.is_whitespace()))
        } else {
            None
        };
        Ok(EdgeLiterals { length, children })
    }

    fn label(&mut self) -> Result<()> {
        self.skip_trivia()?;
        if self.chars.peek() != Some(&'\'') {
            self.take_while(|c| !is_structural(c));
            return Ok(());
        }

        self.chars.next();
        loop {
            match self.chars.next() {
                // '' is an escaped quote
                Some('\'') if self.chars.peek() == Some(&'\'') => {
                    self.chars.next();
                }
                Some('\'') => return Ok(()),
                Some(_) => {}
                None => bail!("unterminated quoted label in newick tree"),
            }
        }
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if !keep(c) {
                break;
            }
            text.push(c);
            self.chars.next();
        }
        text
    }
}

fn is_structural(c: char) -> bool {
    matches!(c, ':' | ',' | '(' | ')' | ';' | '[')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lengths(literals: &EdgeLiterals) -> Vec<Option<&str>> {
        let mut out = vec![literals.length.as_deref()];
        for child in &literals.children {
            out.extend(lengths(child));
        }
        out
    }

    #[test]
    fn keeps_literals_in_preorder() {
        let scanned = scan("((A:0.1,B:1e-5)x:0.30,'C, d':2)root;").unwrap();
        assert_eq!(
            lengths(&scanned),
            vec![None, Some("0.30"), Some("0.1"), Some("1e-5"), Some("2")]
        );
    }

    #[test]
    fn skips_comments_and_escaped_quotes() {
        let scanned = scan("(A[&rate=1]:1, 'it''s' : 2 [tail]) ;").unwrap();
        assert_eq!(lengths(&scanned), vec![None, Some("1"), Some("2")]);
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(scan("((A:1,B:1);").is_err());
        assert!(scan("(A:1,'B:1);").is_err());
    }
}
