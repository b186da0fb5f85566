use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Fields, Ident, Type};

use crate::{FieldKind, FieldOptions, field_kind, parse_entity_options, parse_field_options};

struct ScalarField {
    ident: Ident,
    column: String,
    ty: Type,
    options: FieldOptions,
}

struct RelationField {
    ident: Ident,
    column: String,
    target: Type,
    many: bool,
    foreign_key: Option<String>,
}

enum EntityField {
    Scalar(ScalarField),
    Relation(RelationField),
}

impl EntityField {
    fn column(&self) -> &str {
        match self {
            Self::Scalar(field) => &field.column,
            Self::Relation(field) => &field.column,
        }
    }
}

pub(crate) fn expand_entity(input: DeriveInput) -> syn::Result<TokenStream> {
    let struct_name = input.ident;
    let vis = input.vis;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Entity does not support generic structs",
        ));
    }

    let options = parse_entity_options(&input.attrs)?;

    let Data::Struct(data_struct) = input.data else {
        return Err(syn::Error::new(
            struct_name.span(),
            "Entity can only be derived for structs",
        ));
    };
    let Fields::Named(named_fields) = data_struct.fields else {
        return Err(syn::Error::new(
            struct_name.span(),
            "Entity requires named fields",
        ));
    };

    let mut fields = Vec::<EntityField>::new();
    let mut field_key: Option<String> = None;

    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Entity requires named fields"))?;
        let field_options = parse_field_options(&field.attrs)?;
        if field_options.skip {
            continue;
        }
        let column = ident.unraw().to_string();

        let relation = match field_kind(&field.ty) {
            FieldKind::Scalar => None,
            FieldKind::Reference(target) => Some((target, false)),
            FieldKind::Collection(target) => Some((target, true)),
        };

        match relation {
            None => {
                if field_options.primary_key {
                    if field_key.is_some() {
                        return Err(syn::Error::new(
                            ident.span(),
                            "only one field can be marked primary_key",
                        ));
                    }
                    field_key = Some(column.clone());
                }
                fields.push(EntityField::Scalar(ScalarField {
                    ident,
                    column,
                    ty: field.ty,
                    options: field_options,
                }));
            }
            Some((target, many)) => {
                if field_options.has_scalar_options() {
                    return Err(syn::Error::new(
                        ident.span(),
                        "relation fields only accept foreign_key and skip",
                    ));
                }
                fields.push(EntityField::Relation(RelationField {
                    ident,
                    column,
                    target,
                    many,
                    foreign_key: field_options.foreign_key,
                }));
            }
        }
    }

    if fields.is_empty() {
        return Err(syn::Error::new(
            struct_name.span(),
            "Entity requires at least one persistent field",
        ));
    }

    let primary_key = match (options.primary_key, field_key) {
        (Some(declared), Some(marked)) if !declared.eq_ignore_ascii_case(&marked) => {
            return Err(syn::Error::new(
                struct_name.span(),
                format!(
                    "primary_key = \"{}\" conflicts with the field marked primary_key ({})",
                    declared, marked
                ),
            ));
        }
        (Some(declared), _) => declared,
        (None, Some(marked)) => marked,
        (None, None) => "id".to_string(),
    };

    let entity_name = options.name.unwrap_or_else(|| struct_name.to_string());
    let namespace = options.namespace.map(|ns| quote!(.namespace(#ns)));
    let non_integral_key = options.non_integral_key;

    let properties = fields.iter().map(property_tokens);
    let scalars: Vec<&ScalarField> = fields
        .iter()
        .filter_map(|field| match field {
            EntityField::Scalar(scalar) => Some(scalar),
            EntityField::Relation(_) => None,
        })
        .collect();
    let relations: Vec<&RelationField> = fields
        .iter()
        .filter_map(|field| match field {
            EntityField::Relation(relation) => Some(relation),
            EntityField::Scalar(_) => None,
        })
        .collect();

    let accessor_fns = scalars.iter().map(|field| {
        let ident = &field.ident;
        let ty = &field.ty;
        let get_fn = format_ident!("get_{}", field.column);
        let set_fn = format_ident!("set_{}", field.column);
        quote! {
            fn #get_fn(entity: &#struct_name) -> ::trackorm::Value {
                <#ty as ::trackorm::PersistValue>::to_value(&entity.#ident)
            }

            fn #set_fn(entity: &mut #struct_name, value: ::trackorm::Value) -> ::trackorm::Result<()> {
                entity.#ident = <#ty as ::trackorm::PersistValue>::from_value(value)?;
                Ok(())
            }
        }
    });
    let accessor_entries = scalars.iter().map(|field| {
        let column = &field.column;
        let get_fn = format_ident!("get_{}", field.column);
        let set_fn = format_ident!("set_{}", field.column);
        quote!(::trackorm::FieldAccessor::new(#column, #get_fn, #set_fn))
    });

    let name_consts = fields.iter().map(|field| {
        let const_ident = format_ident!("{}", field.column().to_ascii_uppercase());
        let column = field.column();
        quote!(pub const #const_ident: &'static str = #column;)
    });

    let proxy_trait = format_ident!("{}Proxy", struct_name);
    let mut proxy_decls = Vec::<TokenStream>::new();
    let mut proxy_impls = Vec::<TokenStream>::new();

    for (k, field) in scalars.iter().enumerate() {
        let ident = &field.ident;
        let ty = &field.ty;
        let getter = ident;
        let setter = format_ident!("set_{}", field.column);
        proxy_decls.push(quote! {
            fn #getter(&self) -> &#ty;
            fn #setter(&mut self, value: #ty) -> ::trackorm::Result<()>;
        });
        proxy_impls.push(quote! {
            fn #getter(&self) -> &#ty {
                &self.entity().#ident
            }

            fn #setter(&mut self, value: #ty) -> ::trackorm::Result<()> {
                self.write_field(#k, move |entity| entity.#ident = value)
            }
        });
    }

    for relation in &relations {
        let column = &relation.column;
        let target = &relation.target;
        let getter = &relation.ident;
        let setter = format_ident!("set_{}", relation.column);
        if relation.many {
            proxy_decls.push(quote! {
                fn #getter(&self) -> ::trackorm::Result<Option<Vec<::trackorm::ProxyRef<#target>>>>;
                fn #setter(&mut self, items: Vec<::trackorm::ProxyRef<#target>>) -> ::trackorm::Result<()>;
            });
            proxy_impls.push(quote! {
                fn #getter(&self) -> ::trackorm::Result<Option<Vec<::trackorm::ProxyRef<#target>>>> {
                    self.collection::<#target>(#column)
                }

                fn #setter(&mut self, items: Vec<::trackorm::ProxyRef<#target>>) -> ::trackorm::Result<()> {
                    self.set_collection::<#target>(#column, items)
                }
            });
        } else {
            proxy_decls.push(quote! {
                fn #getter(&self) -> ::trackorm::Result<Option<::trackorm::ProxyRef<#target>>>;
                fn #setter(&mut self, target: Option<&::trackorm::ProxyRef<#target>>) -> ::trackorm::Result<()>;
            });
            proxy_impls.push(quote! {
                fn #getter(&self) -> ::trackorm::Result<Option<::trackorm::ProxyRef<#target>>> {
                    self.reference::<#target>(#column)
                }

                fn #setter(&mut self, target: Option<&::trackorm::ProxyRef<#target>>) -> ::trackorm::Result<()> {
                    self.set_reference::<#target>(#column, target)
                }
            });
        }
    }

    let relations_block = if relations.is_empty() {
        quote!()
    } else {
        let relations_trait = format_ident!("{}Relations", struct_name);
        let decls = relations.iter().map(|relation| {
            let loader = format_ident!("load_{}", relation.column);
            let target = &relation.target;
            if relation.many {
                quote!(fn #loader(&self) -> ::trackorm::LoadFuture<'_, Vec<::trackorm::ProxyRef<#target>>>;)
            } else {
                quote!(fn #loader(&self) -> ::trackorm::LoadFuture<'_, Option<::trackorm::ProxyRef<#target>>>;)
            }
        });
        let impls = relations.iter().map(|relation| {
            let loader = format_ident!("load_{}", relation.column);
            let target = &relation.target;
            let column = &relation.column;
            if relation.many {
                quote! {
                    fn #loader(&self) -> ::trackorm::LoadFuture<'_, Vec<::trackorm::ProxyRef<#target>>> {
                        Box::pin(self.load_collection::<#target>(#column))
                    }
                }
            } else {
                quote! {
                    fn #loader(&self) -> ::trackorm::LoadFuture<'_, Option<::trackorm::ProxyRef<#target>>> {
                        Box::pin(self.load_reference::<#target>(#column))
                    }
                }
            }
        });
        quote! {
            #vis trait #relations_trait {
                #(#decls)*
            }

            impl #relations_trait for ::trackorm::ProxyRef<#struct_name> {
                #(#impls)*
            }
        }
    };

    Ok(quote! {
        impl ::trackorm::Entity for #struct_name {
            const NAME: &'static str = #entity_name;

            fn schema() -> ::trackorm::EntitySchema {
                ::trackorm::EntitySchema::new(#entity_name)
                    #namespace
                    .primary_key(#primary_key)
                    .allow_non_integral_key(#non_integral_key)
                    #(.property(#properties))*
            }

            fn accessors() -> &'static [::trackorm::FieldAccessor<Self>] {
                #(#accessor_fns)*

                const ACCESSORS: &[::trackorm::FieldAccessor<#struct_name>] = &[
                    #(#accessor_entries),*
                ];
                ACCESSORS
            }
        }

        #[allow(dead_code)]
        impl #struct_name {
            #(#name_consts)*
        }

        #vis trait #proxy_trait {
            #(#proxy_decls)*
        }

        impl #proxy_trait for ::trackorm::Proxy<#struct_name> {
            #(#proxy_impls)*
        }

        #relations_block
    })
}

fn property_tokens(field: &EntityField) -> TokenStream {
    match field {
        EntityField::Scalar(field) => {
            let column = &field.column;
            let ty = &field.ty;
            let options = &field.options;

            let default = options
                .default
                .as_ref()
                .map(|value| quote!(.default_value(#value)));

            let mut constraints = Vec::<TokenStream>::new();
            if options.required {
                constraints.push(quote!(::trackorm::Constraint::Required));
            }
            if let Some(n) = options.min_length {
                constraints.push(quote!(::trackorm::Constraint::MinLength(#n)));
            }
            if let Some(n) = options.max_length {
                constraints.push(quote!(::trackorm::Constraint::MaxLength(#n)));
            }
            if options.min.is_some() || options.max.is_some() {
                let min = option_tokens(options.min);
                let max = option_tokens(options.max);
                constraints.push(quote!(::trackorm::Constraint::Range { min: #min, max: #max }));
            }
            if let Some(pattern) = &options.pattern {
                constraints.push(quote!(::trackorm::Constraint::Pattern(#pattern.to_string())));
            }

            quote! {
                ::trackorm::PropertyDescriptor::scalar(
                    #column,
                    <#ty as ::trackorm::PersistValue>::data_type(),
                )
                .nullable(<#ty as ::trackorm::PersistValue>::nullable())
                #default
                #(.constraint(#constraints))*
            }
        }
        EntityField::Relation(field) => {
            let column = &field.column;
            let target = &field.target;
            let foreign_key = field
                .foreign_key
                .as_ref()
                .map(|name| quote!(.foreign_key(#name)));
            if field.many {
                quote! {
                    ::trackorm::PropertyDescriptor::reference_many(
                        #column,
                        <#target as ::trackorm::Entity>::NAME,
                    )
                    #foreign_key
                }
            } else {
                quote! {
                    ::trackorm::PropertyDescriptor::reference_one(
                        #column,
                        <#target as ::trackorm::Entity>::NAME,
                    )
                    #foreign_key
                }
            }
        }
    }
}

fn option_tokens(value: Option<f64>) -> TokenStream {
    match value {
        Some(value) => quote!(Some(#value)),
        None => quote!(None),
    }
}
