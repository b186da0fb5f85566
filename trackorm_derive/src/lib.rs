use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::spanned::Spanned;
use syn::{Expr, ExprLit, ExprUnary, Lit, LitStr, Type, UnOp, parse_macro_input};

mod entity_impl;

/// Reflects a plain struct into a `trackorm::Entity`.
///
/// Struct options: `#[entity(name = "...", namespace = "...", primary_key = "...",
/// non_integral_key)]`.
///
/// Field options: `#[entity(primary_key, default = <literal>, required,
/// min_length = n, max_length = n, min = x, max = x, pattern = "...",
/// foreign_key = "...", skip)]`.
///
/// Fields typed `Reference<T>` or `Collection<T>` declare relations; every
/// other non-skipped field is a scalar and must implement `PersistValue`.
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as syn::DeriveInput);
    match entity_impl::expand_entity(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
pub(crate) struct EntityOptions {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub primary_key: Option<String>,
    pub non_integral_key: bool,
}

#[derive(Default)]
pub(crate) struct FieldOptions {
    pub primary_key: bool,
    pub skip: bool,
    pub required: bool,
    pub default: Option<TokenStream2>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<String>,
    pub foreign_key: Option<String>,
}

impl FieldOptions {
    /// Options that only make sense on scalar fields.
    pub fn has_scalar_options(&self) -> bool {
        self.primary_key
            || self.required
            || self.default.is_some()
            || self.min_length.is_some()
            || self.max_length.is_some()
            || self.min.is_some()
            || self.max.is_some()
            || self.pattern.is_some()
    }
}

pub(crate) fn parse_entity_options(attrs: &[syn::Attribute]) -> syn::Result<EntityOptions> {
    let mut options = EntityOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                options.name = Some(parse_str(&meta)?);
                return Ok(());
            }
            if meta.path.is_ident("namespace") {
                options.namespace = Some(parse_str(&meta)?);
                return Ok(());
            }
            if meta.path.is_ident("primary_key") {
                options.primary_key = Some(parse_str(&meta)?);
                return Ok(());
            }
            if meta.path.is_ident("non_integral_key") {
                options.non_integral_key = true;
                return Ok(());
            }

            Err(meta.error(
                "Unsupported entity attribute. Supported: name = \"...\", namespace = \"...\", primary_key = \"...\", non_integral_key",
            ))
        })?;
    }

    Ok(options)
}

pub(crate) fn parse_field_options(attrs: &[syn::Attribute]) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("primary_key") {
                options.primary_key = true;
                return Ok(());
            }
            if meta.path.is_ident("skip") {
                options.skip = true;
                return Ok(());
            }
            if meta.path.is_ident("required") {
                options.required = true;
                return Ok(());
            }
            if meta.path.is_ident("default") {
                let expr: Expr = meta.value()?.parse()?;
                options.default = Some(default_value_tokens(&expr)?);
                return Ok(());
            }
            if meta.path.is_ident("min_length") {
                options.min_length = Some(parse_usize(&meta)?);
                return Ok(());
            }
            if meta.path.is_ident("max_length") {
                options.max_length = Some(parse_usize(&meta)?);
                return Ok(());
            }
            if meta.path.is_ident("min") {
                let expr: Expr = meta.value()?.parse()?;
                options.min = Some(number_of(&expr)?);
                return Ok(());
            }
            if meta.path.is_ident("max") {
                let expr: Expr = meta.value()?.parse()?;
                options.max = Some(number_of(&expr)?);
                return Ok(());
            }
            if meta.path.is_ident("pattern") {
                options.pattern = Some(parse_str(&meta)?);
                return Ok(());
            }
            if meta.path.is_ident("foreign_key") {
                options.foreign_key = Some(parse_str(&meta)?);
                return Ok(());
            }

            Err(meta.error(
                "Unsupported entity field attribute. Supported: primary_key, default = <literal>, required, min_length, max_length, min, max, pattern, foreign_key, skip",
            ))
        })?;
    }

    Ok(options)
}

fn parse_str(meta: &ParseNestedMeta) -> syn::Result<String> {
    let lit: LitStr = meta.value()?.parse()?;
    Ok(lit.value())
}

fn parse_usize(meta: &ParseNestedMeta) -> syn::Result<usize> {
    let lit: syn::LitInt = meta.value()?.parse()?;
    lit.base10_parse::<usize>()
}

fn number_of(expr: &Expr) -> syn::Result<f64> {
    match expr {
        Expr::Lit(ExprLit { lit: Lit::Int(lit), .. }) => lit.base10_parse::<f64>(),
        Expr::Lit(ExprLit { lit: Lit::Float(lit), .. }) => lit.base10_parse::<f64>(),
        Expr::Unary(ExprUnary {
            op: UnOp::Neg(_),
            expr,
            ..
        }) => number_of(expr).map(|n| -n),
        other => Err(syn::Error::new(other.span(), "expected a numeric literal")),
    }
}

fn default_value_tokens(expr: &Expr) -> syn::Result<TokenStream2> {
    match expr {
        Expr::Lit(ExprLit { lit, .. }) => match lit {
            Lit::Int(lit) => {
                let value = lit.base10_parse::<i64>()?;
                Ok(quote!(::trackorm::Value::Integer(#value)))
            }
            Lit::Float(lit) => {
                let value = lit.base10_parse::<f64>()?;
                Ok(quote!(::trackorm::Value::Float(#value)))
            }
            Lit::Str(lit) => Ok(quote!(::trackorm::Value::Text(#lit.to_string()))),
            Lit::Bool(lit) => {
                let value = lit.value;
                Ok(quote!(::trackorm::Value::Boolean(#value)))
            }
            other => Err(syn::Error::new(
                other.span(),
                "default must be an integer, float, string or bool literal",
            )),
        },
        Expr::Unary(ExprUnary {
            op: UnOp::Neg(_),
            expr: inner,
            ..
        }) => match inner.as_ref() {
            Expr::Lit(ExprLit { lit: Lit::Int(lit), .. }) => {
                let value = -lit.base10_parse::<i64>()?;
                Ok(quote!(::trackorm::Value::Integer(#value)))
            }
            Expr::Lit(ExprLit { lit: Lit::Float(lit), .. }) => {
                let value = -lit.base10_parse::<f64>()?;
                Ok(quote!(::trackorm::Value::Float(#value)))
            }
            other => Err(syn::Error::new(other.span(), "expected a numeric literal")),
        },
        other => Err(syn::Error::new(other.span(), "default must be a literal")),
    }
}

pub(crate) enum FieldKind {
    Scalar,
    Reference(Type),
    Collection(Type),
}

pub(crate) fn field_kind(ty: &Type) -> FieldKind {
    let Type::Path(type_path) = ty else {
        return FieldKind::Scalar;
    };
    let Some(segment) = type_path.path.segments.last() else {
        return FieldKind::Scalar;
    };
    let Some(target) = first_generic_type(segment) else {
        return FieldKind::Scalar;
    };

    if segment.ident == "Reference" {
        FieldKind::Reference(target)
    } else if segment.ident == "Collection" {
        FieldKind::Collection(target)
    } else {
        FieldKind::Scalar
    }
}

fn first_generic_type(segment: &syn::PathSegment) -> Option<Type> {
    let syn::PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };

    for arg in &arguments.args {
        if let syn::GenericArgument::Type(ty) = arg {
            return Some(ty.clone());
        }
    }
    None
}
