//! Attribute parsing for the Model derive macro.
//!
//! Handles struct-level and field-level `#[orm(...)]` attributes.

use syn::meta::ParseNestedMeta;
use syn::{DeriveInput, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum RelationKind {
    HasMany,
    BelongsTo,
}

pub(super) struct RelationAttr {
    pub kind: RelationKind,
    pub name: String,
    pub table: String,
    pub foreign_key: String,
    pub references: String,
    pub span: proc_macro2::Span,
}

pub(super) struct StructAttrs {
    pub table: String,
    pub relations: Vec<RelationAttr>,
}

/// How a struct field maps onto the row.
pub(super) enum FieldRole {
    Column { column: String, is_id: bool },
    Flatten,
    Related(String),
    Skip,
}

fn lit_value(meta: &ParseNestedMeta) -> Result<String> {
    let lit: syn::LitStr = meta.value()?.parse()?;
    Ok(lit.value())
}

fn parse_relation(meta: &ParseNestedMeta, kind: RelationKind) -> Result<RelationAttr> {
    let mut name = None;
    let mut table = None;
    let mut foreign_key = None;
    let mut references = None;
    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("name") {
            name = Some(lit_value(&inner)?);
        } else if inner.path.is_ident("table") {
            table = Some(lit_value(&inner)?);
        } else if inner.path.is_ident("foreign_key") {
            foreign_key = Some(lit_value(&inner)?);
        } else if inner.path.is_ident("references") {
            references = Some(lit_value(&inner)?);
        } else {
            return Err(inner.error("expected name, table, foreign_key or references"));
        }
        Ok(())
    })?;

    let missing = |what: &str| meta.error(format!("relation requires `{what} = \"...\"`"));
    let table = table.ok_or_else(|| missing("table"))?;
    Ok(RelationAttr {
        kind,
        name: name.unwrap_or_else(|| table.clone()),
        foreign_key: foreign_key.ok_or_else(|| missing("foreign_key"))?,
        references: references.unwrap_or_else(|| "id".to_string()),
        table,
        span: meta.path.get_ident().map_or_else(proc_macro2::Span::call_site, |i| i.span()),
    })
}

/// Parse every struct-level `#[orm(...)]` attribute.
pub(super) fn struct_attrs(input: &DeriveInput) -> Result<StructAttrs> {
    let mut table = None;
    let mut relations = Vec::new();

    for attr in input.attrs.iter().filter(|a| a.path().is_ident("orm")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                table = Some(lit_value(&meta)?);
            } else if meta.path.is_ident("has_many") {
                relations.push(parse_relation(&meta, RelationKind::HasMany)?);
            } else if meta.path.is_ident("belongs_to") {
                relations.push(parse_relation(&meta, RelationKind::BelongsTo)?);
            } else {
                return Err(meta.error("expected table, has_many or belongs_to"));
            }
            Ok(())
        })?;
    }

    let table = table.ok_or_else(|| {
        syn::Error::new_spanned(&input.ident, "Model requires #[orm(table = \"table_name\")] attribute")
    })?;
    Ok(StructAttrs { table, relations })
}

/// Parse the `#[orm(...)]` attributes of one named field.
pub(super) fn field_role(field: &syn::Field) -> Result<FieldRole> {
    let mut is_id = false;
    let mut column = None;
    let mut flatten = false;
    let mut related = None;
    let mut skip = false;

    for attr in field.attrs.iter().filter(|a| a.path().is_ident("orm")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                is_id = true;
            } else if meta.path.is_ident("column") {
                column = Some(lit_value(&meta)?);
            } else if meta.path.is_ident("flatten") {
                flatten = true;
            } else if meta.path.is_ident("related") {
                related = Some(lit_value(&meta)?);
            } else if meta.path.is_ident("skip") {
                skip = true;
            } else {
                return Err(meta.error("expected id, column, flatten, related or skip"));
            }
            Ok(())
        })?;
    }

    let exclusive = [flatten, related.is_some(), skip, is_id || column.is_some()];
    if exclusive.iter().filter(|set| **set).count() > 1 {
        return Err(syn::Error::new_spanned(
            field,
            "flatten, related, skip and column/id cannot be combined",
        ));
    }

    Ok(if flatten {
        FieldRole::Flatten
    } else if let Some(name) = related {
        FieldRole::Related(name)
    } else if skip {
        FieldRole::Skip
    } else {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "Model requires named fields"))?;
        FieldRole::Column {
            column: column.unwrap_or_else(|| ident.to_string()),
            is_id,
        }
    })
}
