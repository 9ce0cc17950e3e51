use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, Type};

#[proc_macro_derive(NestedSetModel, attributes(nested_set))]
pub fn derive_nested_set_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_nested_set_model(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    id_field: Option<String>,
    id_type: Option<Type>,
    parent_field: Option<String>,
    lft_field: Option<String>,
    rgt_field: Option<String>,
    scope: Vec<String>,
    soft_delete: Option<String>,
    entity_name: Option<String>,
    lock_timeout_ms: Option<syn::LitInt>,
}

fn impl_nested_set_model(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "NestedSetModel can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("nested_set") {
            parse_nested_set_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let id_field_name = options.id_field.unwrap_or_else(|| "id".to_string());
    let parent_field_name = options
        .parent_field
        .unwrap_or_else(|| "parent_id".to_string());
    let lft_field_name = options.lft_field.unwrap_or_else(|| "lft".to_string());
    let rgt_field_name = options.rgt_field.unwrap_or_else(|| "rgt".to_string());

    let span = struct_ident.span();
    let id_field_ident = Ident::new(&id_field_name, span);
    let parent_field_ident = Ident::new(&parent_field_name, span);
    let lft_field_ident = Ident::new(&lft_field_name, span);
    let rgt_field_ident = Ident::new(&rgt_field_name, span);

    let fields = match &data_struct.fields {
        Fields::Named(fields) => fields,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "NestedSetModel requires named fields",
            ))
        }
    };

    let has_field = |name: &str| {
        fields
            .named
            .iter()
            .any(|field| field.ident.as_ref().is_some_and(|ident| ident == name))
    };
    for required in [&parent_field_name, &lft_field_name, &rgt_field_name]
        .into_iter()
        .chain(options.scope.iter())
        .chain(options.soft_delete.iter())
    {
        if !has_field(required) {
            return Err(syn::Error::new(
                span,
                format!("NestedSetModel: no field named `{required}`"),
            ));
        }
    }

    let mut id_field_type: Option<Type> = options.id_type.clone();
    for field in &fields.named {
        if let Some(ident) = &field.ident {
            if ident == &id_field_ident && id_field_type.is_none() {
                id_field_type = Some(field.ty.clone());
            }
        }
    }

    let id_type = id_field_type.ok_or_else(|| {
        syn::Error::new(
            span,
            "Unable to determine id field type; specify `id_type = ...` in #[nested_set]",
        )
    })?;

    let entity_name = options
        .entity_name
        .unwrap_or_else(|| struct_ident.unraw().to_string());
    let table = table_name.unwrap_or_else(|| struct_ident.unraw().to_string());

    let id_column_variant = format_ident!("{}", to_pascal_case(&id_field_name));
    let parent_column_variant = format_ident!("{}", to_pascal_case(&parent_field_name));
    let lft_column_variant = format_ident!("{}", to_pascal_case(&lft_field_name));
    let rgt_column_variant = format_ident!("{}", to_pascal_case(&rgt_field_name));

    let scope_idents: Vec<Ident> = options
        .scope
        .iter()
        .map(|name| Ident::new(name, span))
        .collect();
    let scope_variants: Vec<Ident> = options
        .scope
        .iter()
        .map(|name| format_ident!("{}", to_pascal_case(name)))
        .collect();

    let entity_name_literal = syn::LitStr::new(&entity_name, span);
    let table_literal = syn::LitStr::new(&table, span);
    let lft_column_literal = syn::LitStr::new(&lft_field_name, span);
    let rgt_column_literal = syn::LitStr::new(&rgt_field_name, span);
    let parent_column_literal = syn::LitStr::new(&parent_field_name, span);

    let scope_option = if options.scope.is_empty() {
        quote! {}
    } else {
        let literals: Vec<syn::LitStr> = options
            .scope
            .iter()
            .map(|name| syn::LitStr::new(name, span))
            .collect();
        quote! { .scope_columns([#(#literals),*]) }
    };

    let (soft_delete_option, deleted_at_body, deleted_at_column_body) = match &options.soft_delete
    {
        Some(name) => {
            let literal = syn::LitStr::new(name, span);
            let ident = Ident::new(name, span);
            let variant = format_ident!("{}", to_pascal_case(name));
            (
                quote! { .soft_delete_column(#literal) },
                quote! { self.#ident },
                quote! { ::core::option::Option::Some(Column::#variant) },
            )
        }
        None => (
            quote! {},
            quote! { ::core::option::Option::None },
            quote! { ::core::option::Option::None },
        ),
    };

    let lock_timeout_option = match &options.lock_timeout_ms {
        Some(millis) => quote! { .lock_timeout(::core::time::Duration::from_millis(#millis)) },
        None => quote! {},
    };

    let generated = quote! {
        impl ::nested_set::NestedSetModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;
            type Id = #id_type;

            fn nested_set_config() -> &'static ::nested_set::NestedSetConfig {
                static CONFIG: ::once_cell::sync::Lazy<::nested_set::NestedSetConfig> =
                    ::once_cell::sync::Lazy::new(|| {
                        let base = ::nested_set::NestedSetConfig::new(
                            #entity_name_literal,
                            #table_literal,
                        );
                        ::nested_set::NestedSetOptions::default()
                            .lft_column(#lft_column_literal)
                            .rgt_column(#rgt_column_literal)
                            .parent_column(#parent_column_literal)
                            #scope_option
                            #soft_delete_option
                            #lock_timeout_option
                            .apply(base)
                    });
                &CONFIG
            }

            fn id(&self) -> Self::Id {
                self.#id_field_ident.clone()
            }

            fn parent_id(&self) -> Option<Self::Id> {
                self.#parent_field_ident.clone()
            }

            #[allow(clippy::unnecessary_cast)]
            fn lft(&self) -> i64 {
                self.#lft_field_ident as i64
            }

            #[allow(clippy::unnecessary_cast)]
            fn rgt(&self) -> i64 {
                self.#rgt_field_ident as i64
            }

            fn scope_values(&self) -> ::std::vec::Vec<::sea_orm::Value> {
                ::std::vec![#(::sea_orm::Value::from(self.#scope_idents.clone())),*]
            }

            fn deleted_at(&self) -> Option<i64> {
                #deleted_at_body
            }

            fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>) {
                active.#parent_field_ident = ::sea_orm::ActiveValue::Set(parent);
            }

            fn set_bounds(
                active: &mut Self::ActiveModel,
                lft: i64,
                rgt: i64,
            ) -> ::nested_set::Result<()> {
                active.#lft_field_ident = ::sea_orm::ActiveValue::Set(
                    ::nested_set::traits::narrow_bound(#entity_name_literal, lft)?,
                );
                active.#rgt_field_ident = ::sea_orm::ActiveValue::Set(
                    ::nested_set::traits::narrow_bound(#entity_name_literal, rgt)?,
                );
                Ok(())
            }

            fn id_to_value(id: &Self::Id) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn parent_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#parent_column_variant
            }

            fn lft_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#lft_column_variant
            }

            fn rgt_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#rgt_column_variant
            }

            fn scope_columns() -> ::std::vec::Vec<<Self::Entity as ::sea_orm::EntityTrait>::Column> {
                ::std::vec![#(Column::#scope_variants),*]
            }

            fn deleted_at_column() -> Option<<Self::Entity as ::sea_orm::EntityTrait>::Column> {
                #deleted_at_column_body
            }
        }
    };

    Ok(generated.into())
}

fn parse_nested_set_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        match ident.as_str() {
            "id_field" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.id_field = Some(value.value());
            }
            "parent_field" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.parent_field = Some(value.value());
            }
            "lft_field" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.lft_field = Some(value.value());
            }
            "rgt_field" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.rgt_field = Some(value.value());
            }
            "scope" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.scope = split_list(&value.value());
            }
            "soft_delete" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.soft_delete = Some(value.value());
            }
            "entity_name" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.entity_name = Some(value.value());
            }
            "lock_timeout_ms" => {
                let value: syn::LitInt = meta.value()?.parse()?;
                value.base10_parse::<u64>()?;
                options.lock_timeout_ms = Some(value);
            }
            "id_type" => {
                let ty: Type = meta.value()?.parse()?;
                options.id_type = Some(ty);
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported nested_set option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: syn::LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_lists_are_trimmed() {
        assert_eq!(split_list(" menu_id, locale ,"), vec!["menu_id", "locale"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn lock_timeout_option_takes_milliseconds() {
        let attr: Attribute = syn::parse_quote!(#[nested_set(scope = "menu_id", lock_timeout_ms = 250)]);
        let mut options = Options::default();
        parse_nested_set_attr(&attr, &mut options).unwrap();
        assert_eq!(options.scope, vec!["menu_id"]);
        let millis = options.lock_timeout_ms.unwrap();
        assert_eq!(millis.base10_parse::<u64>().unwrap(), 250);

        let attr: Attribute = syn::parse_quote!(#[nested_set(lock_timeout_ms = "soon")]);
        assert!(parse_nested_set_attr(&attr, &mut Options::default()).is_err());
    }

    #[test]
    fn column_variants_follow_sea_orm_naming() {
        assert_eq!(to_pascal_case("parent_id"), "ParentId");
        assert_eq!(to_pascal_case("lft"), "Lft");
        assert_eq!(to_pascal_case("deleted_at"), "DeletedAt");
    }
}
