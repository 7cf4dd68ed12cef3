//! Record field-ordering rule (spec invariant 7), grounded on
//! `mdb/avro/record.py`'s `Structure` base class: base-class fields come
//! first, in inherited declaration order, except any name the subclass
//! itself redeclares; the subclass's own fields follow in their declared
//! order.

use super::schema::Field;

pub fn resolve_fields(base_fields: &[Field], own_fields: Vec<Field>) -> Vec<Field> {
    let own_names: std::collections::HashSet<&str> =
        own_fields.iter().map(|f| f.name.as_str()).collect();

    let mut resolved: Vec<Field> = base_fields
        .iter()
        .filter(|f| !own_names.contains(f.name.as_str()))
        .cloned()
        .collect();
    resolved.extend(own_fields);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::schema::Schema;

    fn field(name: &str) -> Field {
        Field {
            name: name.to_string(),
            schema: Box::new(Schema::String),
        }
    }

    #[test]
    fn base_fields_come_first_excluding_redeclared() {
        let base = vec![field("name"), field("title"), field("folder")];
        let own = vec![field("title"), field("contents")];
        let resolved = resolve_fields(&base, own);
        let names: Vec<&str> = resolved.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "folder", "title", "contents"]);
    }

    #[test]
    fn no_base_fields_is_identity() {
        let own = vec![field("a"), field("b")];
        let resolved = resolve_fields(&[], own.clone());
        assert_eq!(resolved, own);
    }
}
