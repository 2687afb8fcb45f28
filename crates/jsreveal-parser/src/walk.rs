use tree_sitter::Node;

/// Recursion limit for the recursive rewriters built on top of this crate. Hostile input can nest
/// far deeper than any real program; subtrees below this depth are left untouched.
pub const MAX_DEPTH: usize = 512;

/// Visits `root` and its descendants in pre-order. `f` returns whether to descend into the node.
pub fn visit<'t, F>(root: Node<'t>, mut f: F)
where
    F: FnMut(Node<'t>) -> bool,
{
    let mut cursor = root.walk();
    loop {
        let descend = f(cursor.node());
        if descend && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

pub fn preorder(root: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    visit(root, |node| {
        out.push(node);
        true
    });
    out
}

pub fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

pub fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Named children that are not comments.
pub fn code_children(node: Node<'_>) -> Vec<Node<'_>> {
    named_children(node)
        .into_iter()
        .filter(|n| n.kind() != "comment")
        .collect()
}

/// Strips any number of wrapping `parenthesized_expression` nodes.
pub fn unwrap_parens(mut node: Node<'_>) -> Node<'_> {
    while node.kind() == "parenthesized_expression" {
        match code_children(node).into_iter().next() {
            Some(inner) => node = inner,
            None => break,
        }
    }
    node
}

pub fn is_statement_list(kind: &str) -> bool {
    matches!(
        kind,
        "program" | "statement_block" | "switch_case" | "switch_default" | "class_static_block"
    )
}

pub fn is_function_like(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration"
            | "function_expression"
            | "function"
            | "arrow_function"
            | "generator_function"
            | "generator_function_declaration"
            | "method_definition"
    )
}

pub fn is_loop(kind: &str) -> bool {
    matches!(
        kind,
        "for_statement" | "for_in_statement" | "while_statement" | "do_statement"
    )
}

/// Member-call helper: for `a.b(...)` or `a['b'](...)` returns the property name `b`.
pub fn called_property<'s>(call: Node<'_>, source: &'s str) -> Option<&'s str> {
    let callee = unwrap_parens(call.child_by_field_name("function")?);
    property_name(callee, source)
}

/// Property name of a `member_expression` or of a `subscript_expression` with a plain string key.
pub fn property_name<'s>(member: Node<'_>, source: &'s str) -> Option<&'s str> {
    match member.kind() {
        "member_expression" => {
            let prop = member.child_by_field_name("property")?;
            Some(&source[prop.byte_range()])
        }
        "subscript_expression" => {
            let index = member.child_by_field_name("index")?;
            if index.kind() != "string" {
                return None;
            }
            let raw = &source[index.byte_range()];
            if raw.len() < 2 || raw.contains('\\') {
                return None;
            }
            Some(&raw[1..raw.len() - 1])
        }
        _ => None,
    }
}
