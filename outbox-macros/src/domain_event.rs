use crate::utils::apply_derives;
use proc_macro::TokenStream;
use quote::{ToTokens, quote};
use std::collections::{HashMap, HashSet};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr, Ident, Item, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[domain_event] 宏实现
/// - 仅支持非空枚举，变体形态不限（具名/元组/单元）
/// - 生成 `::outbox_domain::domain_event::DomainEvent` 实现（EVENT_TYPES/event_type/event_version/validate）
/// - 支持：`#[domain_event(version = N, validate = path)]`（枚举级默认值）
/// - 变体可覆写：`#[event(event_type = "...", event_version = N)]`
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let mut input = parse_macro_input!(item as Item);

    let enum_item = match &mut input {
        Item::Enum(e) => e,
        other => {
            return syn::Error::new(
                other.span(),
                "#[domain_event] can only be used on enum types",
            )
            .to_compile_error()
            .into();
        }
    };

    if enum_item.variants.is_empty() {
        return syn::Error::new(
            enum_item.span(),
            "#[domain_event] requires at least one variant",
        )
        .to_compile_error()
        .into();
    }

    let version_lit = cfg.version.unwrap_or_else(|| syn::parse_quote! { 1 });

    // 合并/追加默认派生：Debug, Clone, PartialEq, Serialize, Deserialize
    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(Clone),
        syn::parse_quote!(PartialEq),
        syn::parse_quote!(serde::Serialize),
        syn::parse_quote!(serde::Deserialize),
    ];
    apply_derives(&mut enum_item.attrs, required);

    let mut variant_types: HashMap<String, syn::LitStr> = HashMap::new();
    let mut variant_versions: HashMap<String, syn::LitInt> = HashMap::new();

    for v in &mut enum_item.variants {
        let mut retained_attrs = Vec::new();
        let mut type_lit: Option<syn::LitStr> = None;
        let mut version_lit_local: Option<syn::LitInt> = None;

        for attr in v.attrs.iter() {
            if attr.path().is_ident("event") {
                match parse_variant_event_attr(attr) {
                    Ok(vc) => {
                        if let Some(lit) = vc.ty {
                            if type_lit.is_some() {
                                return syn::Error::new(
                                    attr.span(),
                                    "duplicate 'event_type' specified for this variant",
                                )
                                .to_compile_error()
                                .into();
                            }
                            type_lit = Some(lit);
                        }
                        if let Some(lit) = vc.version {
                            if version_lit_local.is_some() {
                                return syn::Error::new(
                                    attr.span(),
                                    "duplicate 'event_version' specified for this variant",
                                )
                                .to_compile_error()
                                .into();
                            }
                            version_lit_local = Some(lit);
                        }
                    }
                    Err(err) => {
                        return err.to_compile_error().into();
                    }
                }
            } else {
                retained_attrs.push(attr.clone());
            }
        }

        v.attrs = retained_attrs;
        if let Some(lit) = type_lit {
            variant_types.insert(v.ident.to_string(), lit);
        }
        if let Some(lit) = version_lit_local {
            variant_versions.insert(v.ident.to_string(), lit);
        }
    }

    // 变体 -> 事件类型标签：变体级覆盖或默认 EnumName.Variant
    let enum_ident = &enum_item.ident;
    let enum_name_string = enum_ident.to_string();
    let type_lits: Vec<(Ident, syn::LitStr)> = enum_item
        .variants
        .iter()
        .map(|v| {
            let key = v.ident.to_string();
            let lit = variant_types.get(&key).cloned().unwrap_or_else(|| {
                syn::LitStr::new(&format!("{}.{}", enum_name_string, key), v.ident.span())
            });
            (v.ident.clone(), lit)
        })
        .collect();

    // 类型标签是注册表的键，必须唯一
    let mut seen = HashSet::new();
    for (_, lit) in &type_lits {
        if !seen.insert(lit.value()) {
            return syn::Error::new(
                lit.span(),
                format!("duplicate event type '{}' in #[domain_event] enum", lit.value()),
            )
            .to_compile_error()
            .into();
        }
    }

    let all_types = type_lits.iter().map(|(_, lit)| lit);

    let type_match_arms = type_lits.iter().map(|(v_ident, lit)| {
        quote! { Self::#v_ident { .. } => #lit }
    });

    let ver_match_arms = enum_item.variants.iter().map(|v| {
        let v_ident = &v.ident;
        let key = v_ident.to_string();
        if let Some(lit) = variant_versions.get(&key) {
            quote! { Self::#v_ident { .. } => #lit }
        } else {
            quote! { Self::#v_ident { .. } => #version_lit }
        }
    });

    let validate_fn = cfg.validate.map(|path| {
        quote! {
            fn validate(&self) -> ::outbox_domain::error::DomainResult<()> {
                (#path)(self)
            }
        }
    });

    let generics = enum_item.generics.clone();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let out = quote! {
        #enum_item

        impl #impl_generics ::outbox_domain::domain_event::DomainEvent for #enum_ident #ty_generics #where_clause {
            const EVENT_TYPES: &'static [&'static str] = &[ #( #all_types ),* ];
            fn event_type(&self) -> &'static str { match self { #( #type_match_arms, )* } }
            fn event_version(&self) -> usize { match self { #( #ver_match_arms, )* } }
            #validate_fn
        }
    };

    TokenStream::from(out)
}

// -------- utils & parsing --------

struct VariantEventAttrConfig {
    ty: Option<syn::LitStr>,
    version: Option<syn::LitInt>,
}

fn parse_variant_event_attr(attr: &syn::Attribute) -> Result<VariantEventAttrConfig> {
    match &attr.meta {
        syn::Meta::List(_) => {
            let mut ty: Option<syn::LitStr> = None;
            let mut version: Option<syn::LitInt> = None;
            let pairs: Punctuated<VariantEventAttrKv, Token![,]> = attr
                .parse_args_with(Punctuated::<VariantEventAttrKv, Token![,]>::parse_terminated)?;

            for kv in pairs {
                match kv.key.to_string().as_str() {
                    "event_type" => {
                        if ty.is_some() {
                            return Err(syn::Error::new(
                                kv.key.span(),
                                "duplicate key 'event_type' in attribute",
                            ));
                        }
                        let lit = match kv.value {
                            Expr::Lit(syn::ExprLit {
                                lit: syn::Lit::Str(lit),
                                ..
                            }) => lit,
                            other => {
                                return Err(syn::Error::new(
                                    other.span(),
                                    "expected string literal for 'event_type'",
                                ));
                            }
                        };
                        if lit.value().is_empty() {
                            return Err(syn::Error::new(
                                lit.span(),
                                "'event_type' must not be empty",
                            ));
                        }
                        ty = Some(lit);
                    }
                    "event_version" => {
                        if version.is_some() {
                            return Err(syn::Error::new(
                                kv.key.span(),
                                "duplicate key 'event_version' in attribute",
                            ));
                        }
                        let lit = match kv.value {
                            Expr::Lit(syn::ExprLit {
                                lit: syn::Lit::Int(lit),
                                ..
                            }) => lit,
                            other => {
                                return Err(syn::Error::new(
                                    other.span(),
                                    "expected integer literal for 'event_version'",
                                ));
                            }
                        };
                        version = Some(lit);
                    }
                    _ => {
                        return Err(syn::Error::new(
                            kv.key.span(),
                            "unknown key; expected 'event_type' | 'event_version'",
                        ));
                    }
                }
            }

            Ok(VariantEventAttrConfig { ty, version })
        }
        other => Err(syn::Error::new(other.span(), "expected #[event(...)]")),
    }
}

struct VariantEventAttrKv {
    key: Ident,
    #[allow(dead_code)]
    eq: Token![=],
    value: Expr,
}

impl Parse for VariantEventAttrKv {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Self {
            key: input.parse()?,
            eq: input.parse()?,
            value: input.parse()?,
        })
    }
}

// 解析 domain_event 宏键值参数：version = <int>、validate = <path>
struct EventAttrConfig {
    version: Option<syn::LitInt>,
    validate: Option<syn::ExprPath>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut version: Option<syn::LitInt> = None;
        let mut validate: Option<syn::ExprPath> = None;

        if input.is_empty() {
            return Ok(Self { version, validate });
        }

        let pairs: Punctuated<syn::ExprAssign, Token![,]> =
            Punctuated::<syn::ExprAssign, Token![,]>::parse_terminated(input)?;

        for assign in pairs.into_iter() {
            let key_ident = match *assign.left {
                syn::Expr::Path(p) if p.path.segments.len() == 1 => {
                    p.path.segments[0].ident.clone()
                }
                other => {
                    return Err(syn::Error::new(other.span(), "invalid attribute key"));
                }
            };
            match key_ident.to_string().as_str() {
                "version" => {
                    if version.is_some() {
                        return Err(syn::Error::new(
                            key_ident.span(),
                            "duplicate key 'version' in attribute",
                        ));
                    }
                    let lit: syn::LitInt = syn::parse2(assign.right.to_token_stream())?;
                    version = Some(lit);
                }
                "validate" => {
                    if validate.is_some() {
                        return Err(syn::Error::new(
                            key_ident.span(),
                            "duplicate key 'validate' in attribute",
                        ));
                    }
                    let path: syn::ExprPath = syn::parse2(assign.right.to_token_stream())?;
                    validate = Some(path);
                }
                _ => {
                    return Err(syn::Error::new(
                        key_ident.span(),
                        "unknown key; expected 'version' | 'validate'",
                    ));
                }
            }
        }

        Ok(Self { version, validate })
    }
}
