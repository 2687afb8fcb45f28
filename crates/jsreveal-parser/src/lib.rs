/*! Parse JavaScript into a syntax tree and walk it.
 *
 * Both analysis pipelines look at the same thing: a concrete syntax tree with byte ranges that map
 * straight back onto the source. Rewrites are expressed as byte-range edits over the original text,
 * so formatting and comments outside a rewritten node survive untouched.
 */

pub mod edit;
pub mod literal;
pub mod walk;

pub use edit::EditSet;
pub use walk::{children, named_children, preorder, unwrap_parens, visit, MAX_DEPTH};

use thiserror::Error;
use tree_sitter::{Language, Node, Parser, Tree};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Failed to load JavaScript grammar: {0}")]
    Language(String),
    #[error("Parser produced no tree")]
    NoTree,
    #[error("Syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;

pub struct SourceTree {
    source: String,
    tree: Tree,
}

impl SourceTree {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        &self.source[node.byte_range()]
    }

    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    /// Pre-order walk over every node of the tree.
    pub fn walk<'t, F>(&'t self, mut f: F)
    where
        F: FnMut(Node<'t>),
    {
        visit(self.tree.root_node(), |node| {
            f(node);
            true
        });
    }

    pub fn nodes(&self) -> Vec<Node<'_>> {
        preorder(self.tree.root_node())
    }

    pub fn nodes_of_kind<'t>(&'t self, kind: &str) -> Vec<Node<'t>> {
        self.nodes()
            .into_iter()
            .filter(|n| n.kind() == kind)
            .collect()
    }
}

fn javascript() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}

/// Parses `source`, rejecting any tree that contains error or missing nodes.
pub fn parse(source: &str) -> ParseResult<SourceTree> {
    let tree = parse_lenient(source)?;
    if tree.has_errors() {
        return Err(first_syntax_error(&tree));
    }
    Ok(tree)
}

/// Parses `source` and keeps whatever tree error recovery produced.
pub fn parse_lenient(source: &str) -> ParseResult<SourceTree> {
    let mut parser = Parser::new();
    parser
        .set_language(&javascript())
        .map_err(|e| ParseError::Language(e.to_string()))?;

    let tree = parser.parse(source, None).ok_or(ParseError::NoTree)?;

    Ok(SourceTree {
        source: source.to_string(),
        tree,
    })
}

pub fn check(source: &str) -> bool {
    parse(source).is_ok()
}

/// Human readable `line L, column C` (1-based) for reports.
pub fn location_of(node: Node<'_>) -> String {
    let pos = node.start_position();
    format!("line {}, column {}", pos.row + 1, pos.column + 1)
}

fn first_syntax_error(tree: &SourceTree) -> ParseError {
    let mut found: Option<(usize, usize, String)> = None;
    visit(tree.root(), |node| {
        if found.is_some() {
            return false;
        }
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            let message = if node.is_missing() {
                format!("missing {}", node.kind())
            } else {
                "unexpected token".to_string()
            };
            found = Some((pos.row + 1, pos.column + 1, message));
            return false;
        }
        node.has_error()
    });

    let (line, column, message) =
        found.unwrap_or((1, 1, "syntax error".to_string()));
    ParseError::Syntax {
        line,
        column,
        message,
    }
}
