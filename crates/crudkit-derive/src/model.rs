//! Model derive macro implementation
//!
//! ## Module Structure
//!
//! - `attrs`: struct and field attribute parsing

mod attrs;

use attrs::{FieldRole, RelationKind};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Result};

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Model can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Model can only be derived for structs",
            ));
        }
    };

    let struct_attrs = attrs::struct_attrs(&input)?;
    let table = &struct_attrs.table;

    let mut primary_key: Option<String> = None;
    let mut schema_fields = Vec::new();
    let mut to_fields = Vec::new();
    let mut from_fields = Vec::new();
    let mut attach_arms = Vec::new();

    for field in fields {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "Model requires named fields"))?;
        let ty = &field.ty;

        match attrs::field_role(field)? {
            FieldRole::Column { column, is_id } => {
                if is_id {
                    if primary_key.is_some() {
                        return Err(syn::Error::new_spanned(field, "only one field can be #[orm(id)]"));
                    }
                    primary_key = Some(column.clone());
                }
                schema_fields.push(quote! { fields.push(#column); });
                to_fields.push(quote! {
                    out.insert(#column.to_string(), ::crudkit::value::Value::from(::core::clone::Clone::clone(&self.#ident)));
                });
                from_fields.push(quote! {
                    #ident: ::crudkit::model::take_field(&mut fields, #column)?
                });
            }
            FieldRole::Flatten => {
                schema_fields.push(quote! {
                    fields.extend_from_slice(<#ty as ::crudkit::model::FieldGroup>::FIELDS);
                });
                to_fields.push(quote! {
                    ::crudkit::model::FieldGroup::write_fields(&self.#ident, &mut out);
                });
                from_fields.push(quote! {
                    #ident: <#ty as ::crudkit::model::FieldGroup>::read_fields(&mut fields)?
                });
            }
            FieldRole::Related(relation) => {
                if !struct_attrs.relations.iter().any(|r| r.name == relation) {
                    return Err(syn::Error::new_spanned(
                        field,
                        format!("no has_many/belongs_to relation named `{relation}`"),
                    ));
                }
                from_fields.push(quote! { #ident: ::core::default::Default::default() });
                attach_arms.push(quote! {
                    #relation => {
                        self.#ident = <#ty as ::crudkit::model::Related>::from_related_rows(rows)?;
                        Ok(())
                    }
                });
            }
            FieldRole::Skip => {
                from_fields.push(quote! { #ident: ::core::default::Default::default() });
            }
        }
    }

    let primary_key = match primary_key {
        Some(pk) => pk,
        None if fields.iter().any(|f| f.ident.as_ref().is_some_and(|i| i == "id")) => "id".to_string(),
        None => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Model requires an #[orm(id)] field or a field named `id`",
            ));
        }
    };

    let relations = struct_attrs.relations.iter().map(|r| {
        let (rel_name, rel_table, fk, references) = (&r.name, &r.table, &r.foreign_key, &r.references);
        let ctor = match r.kind {
            RelationKind::HasMany => quote! { has_many },
            RelationKind::BelongsTo => quote! { belongs_to },
        };
        quote::quote_spanned! {r.span=>
            .relation(::crudkit::model::Relation::#ctor(#rel_name, #rel_table, #fk).references(#references))
        }
    });

    let attach = if attach_arms.is_empty() {
        quote! {}
    } else {
        quote! {
            fn attach(
                &mut self,
                relation: &str,
                rows: ::std::vec::Vec<::crudkit::model::FieldMap>,
            ) -> ::crudkit::error::CrudResult<()> {
                match relation {
                    #(#attach_arms)*
                    other => Err(::crudkit::error::CrudError::invalid_field(
                        other,
                        ::core::option::Option::None,
                        ::std::format!("{} has no relation slot", #table),
                    )),
                }
            }
        }
    };

    Ok(quote! {
        impl #impl_generics ::crudkit::model::Model for #name #ty_generics #where_clause {
            fn schema() -> &'static ::crudkit::model::Schema {
                static SCHEMA: ::std::sync::OnceLock<::crudkit::model::Schema> = ::std::sync::OnceLock::new();
                SCHEMA.get_or_init(|| {
                    let mut fields: ::std::vec::Vec<&'static str> = ::std::vec::Vec::new();
                    #(#schema_fields)*
                    ::crudkit::model::Schema::new(#table)
                        .fields(fields)
                        .primary_key(#primary_key)
                        #(#relations)*
                })
            }

            fn to_fields(&self) -> ::crudkit::model::FieldMap {
                let mut out = ::crudkit::model::FieldMap::new();
                #(#to_fields)*
                out
            }

            fn from_fields(
                mut fields: ::crudkit::model::FieldMap,
            ) -> ::crudkit::error::CrudResult<Self> {
                ::core::result::Result::Ok(Self {
                    #(#from_fields,)*
                })
            }

            #attach
        }
    })
}
