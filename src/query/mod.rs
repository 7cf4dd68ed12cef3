//! L6 — path query language (spec §4.7): lexer, recursive-descent parser,
//! AST, closure-based compiler, and a tree-walking runtime. Grounded on
//! `mdb/query/{parse,ast,compiler,tree}.py`, `mdb/query.py`, and
//! `mdb/query/ops.py`.

pub mod ast;
pub mod compiler;
pub mod lexer;
pub mod parser;
pub mod runtime;

use thiserror::Error;

pub use runtime::{QueryValue, Tree};

#[derive(Debug, Error)]
pub enum Error {
    #[error("syntax error at position {pos}: unexpected {token}")]
    Syntax { pos: usize, token: String },
    #[error("unbound name: {0}")]
    NameError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parses and evaluates `source` against `tree`, starting from `initial`
/// (typically `[QueryValue::Node(root_key)]`). Spec §4.7 step 4's closing
/// sentence: "a final pass deduplicates results by identity."
pub fn evaluate(tree: &Tree, source: &str, initial: Vec<QueryValue>) -> crate::Result<Vec<QueryValue>> {
    tracing::debug!(query = source, "query::evaluate");
    let ast = parser::parse(source)?;
    let compiled = compiler::compile(&ast)?;
    let result = runtime::expand(tree, &initial, |ctx| compiled(ctx))?;
    let result = runtime::unique(result);
    tracing::trace!(results = result.len(), "query::evaluate: done");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::key::{Key, KeyId};
    use crate::codec::registry::SchemaRegistry;
    use crate::codec::value::{RecordValue, Value};
    use std::rc::Rc;
    use std::sync::Arc;

    fn key(kind: &str, name: &str) -> Key {
        Key::make(kind, Some(KeyId::String(format!("{kind}:{name}"))))
    }

    fn record(kind: &str, name: &str, folder: Option<&Key>, extra: Vec<(&str, Value)>) -> Value {
        let mut fields = vec![
            ("name".to_string(), Value::String(name.to_string())),
            (
                "folder".to_string(),
                match folder {
                    Some(k) => Value::Union(1, Box::new(Value::String(k.as_str().to_string()))),
                    None => Value::Union(0, Box::new(Value::Null)),
                },
            ),
        ];
        fields.extend(extra.into_iter().map(|(n, v)| (n.to_string(), v)));
        Value::Record(Arc::new(RecordValue { type_name: crate::codec::schema::TypeName::new(kind), fields }))
    }

    /// Builds the fixture tree used by E6-style scenarios: a Site root
    /// with an `about` Page and a `news` Folder containing three Page
    /// children, mirroring `/test`, `/test/about`,
    /// `/test/news/article-{1,2,3}`.
    fn fixture() -> (Tree, Key) {
        let registry = Rc::new(SchemaRegistry::new());
        let mut tree = Tree::new(registry);

        let site = key("Site", "test");
        let about = key("Page", "about");
        let news = key("Folder", "news");
        let a1 = key("Page", "article-1");
        let a2 = key("Page", "article-2");
        let a3 = key("Page", "article-3");

        tree.insert(
            site.clone(),
            &record(
                "Site",
                "test",
                None,
                vec![(
                    "contents",
                    Value::Omap(vec![
                        ("about".to_string(), Value::String(about.as_str().to_string())),
                        ("news".to_string(), Value::String(news.as_str().to_string())),
                    ]),
                )],
            ),
        )
        .unwrap();
        tree.insert(about.clone(), &record("Page", "about", Some(&site), vec![])).unwrap();
        tree.insert(
            news.clone(),
            &record(
                "Folder",
                "news",
                Some(&site),
                vec![(
                    "contents",
                    Value::Omap(vec![
                        ("article-1".to_string(), Value::String(a1.as_str().to_string())),
                        ("article-2".to_string(), Value::String(a2.as_str().to_string())),
                        ("article-3".to_string(), Value::String(a3.as_str().to_string())),
                    ]),
                )],
            ),
        )
        .unwrap();
        tree.insert(a1.clone(), &record("Page", "article-1", Some(&news), vec![])).unwrap();
        tree.insert(a2.clone(), &record("Page", "article-2", Some(&news), vec![])).unwrap();
        tree.insert(a3.clone(), &record("Page", "article-3", Some(&news), vec![])).unwrap();

        (tree, site)
    }

    fn nodes(values: Vec<QueryValue>) -> Vec<Key> {
        values
            .into_iter()
            .filter_map(|v| match v {
                QueryValue::Node(k) => Some(k),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn child_axis_walks_named_children() {
        let (tree, site) = fixture();
        let result = evaluate(&tree, "child::news", vec![QueryValue::Node(site)]).unwrap();
        assert_eq!(tree.name(&nodes(result)[0]), "news");
    }

    #[test]
    fn abbreviated_child_step_matches_name() {
        let (tree, site) = fixture();
        let result = evaluate(&tree, "news/article-2", vec![QueryValue::Node(site)]).unwrap();
        assert_eq!(nodes(result).len(), 1);
    }

    #[test]
    fn descendant_axis_finds_all_pages_by_kind() {
        let (tree, site) = fixture();
        let result = evaluate(&tree, "descendant::Page", vec![QueryValue::Node(site)]).unwrap();
        assert_eq!(nodes(result).len(), 4);
    }

    #[test]
    fn predicate_filters_by_position() {
        let (tree, site) = fixture();
        let result = evaluate(&tree, "news/*[2]", vec![QueryValue::Node(site)]).unwrap();
        let ks = nodes(result);
        assert_eq!(ks.len(), 1);
        assert_eq!(tree.name(&ks[0]), "article-2");
    }

    #[test]
    fn following_sibling_axis_excludes_self() {
        let (tree, site) = fixture();
        let news = evaluate(&tree, "child::news", vec![QueryValue::Node(site.clone())]).unwrap();
        let a1 = evaluate(&tree, "article-1", news).unwrap();
        let result = evaluate(&tree, "following-sibling::*", a1).unwrap();
        let names: Vec<String> = nodes(result).iter().map(|k| tree.name(k)).collect();
        assert_eq!(names, vec!["article-2", "article-3"]);
    }

    #[test]
    fn root_function_dedups_to_the_site() {
        let (tree, site) = fixture();
        let a1 = evaluate(&tree, "//article-1", vec![QueryValue::Node(site.clone())]).unwrap();
        let result = evaluate(&tree, "root()", a1).unwrap();
        let ks = nodes(result);
        assert_eq!(ks.len(), 1);
        assert_eq!(ks[0], site);
    }

    #[test]
    fn for_expression_binds_each_item() {
        let (tree, _site) = fixture();
        let result = evaluate(&tree, "for $x in 1 to 3 return $x * 2", vec![QueryValue::Integer(0)]).unwrap();
        let ints: Vec<i64> = result
            .into_iter()
            .map(|v| match v {
                QueryValue::Integer(n) => n,
                QueryValue::Decimal(n) => n as i64,
                _ => panic!("expected numeric"),
            })
            .collect();
        assert_eq!(ints, vec![2, 4, 6]);
    }

    #[test]
    fn quantified_some_and_every() {
        let (tree, _site) = fixture();
        let some = evaluate(&tree, "some $x in (1, 2, 3) satisfies $x eq 2", vec![QueryValue::Integer(0)]).unwrap();
        assert!(matches!(some[0], QueryValue::Boolean(true)));
        let every = evaluate(&tree, "every $x in (1, 2, 3) satisfies $x gt 0", vec![QueryValue::Integer(0)]).unwrap();
        assert!(matches!(every[0], QueryValue::Boolean(true)));
    }

    #[test]
    fn if_then_else_picks_a_branch() {
        let (tree, _site) = fixture();
        let result = evaluate(&tree, "if (1 eq 1) then 'yes' else 'no'", vec![QueryValue::Integer(0)]).unwrap();
        assert!(matches!(&result[0], QueryValue::Str(s) if s == "yes"));
    }

    #[test]
    fn union_dedups_across_two_paths() {
        let (tree, site) = fixture();
        let result = evaluate(&tree, "news/article-1 | news/article-1", vec![QueryValue::Node(site)]).unwrap();
        assert_eq!(nodes(result).len(), 1);
    }

    #[test]
    fn name_test_by_uppercase_identifier_is_a_kind_test() {
        let (tree, site) = fixture();
        let result = evaluate(&tree, "child::Page", vec![QueryValue::Node(site)]).unwrap();
        // The site's direct Page child is "about"; "news" is a Folder and
        // must not match.
        let names: Vec<String> = nodes(result).iter().map(|k| tree.name(k)).collect();
        assert_eq!(names, vec!["about"]);
    }

    #[test]
    fn syntax_error_reports_position_and_token() {
        let err = parser::parse("news[").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }
}
