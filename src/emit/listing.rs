//! Textual IL listing of a generated module.
//!
//! The listing is deterministic: types appear in definition order with nested types inside
//! their enclosing type, and members appear in declaration order.

use std::fmt::Write;

use crate::metadata::{
    attributes::{FieldAttributes, MethodAttributes, TypeAttributes},
    members::{Member, TypeKind},
    registry::MemberRegistry,
    token::Token,
};

const INDENT: &str = "  ";

/// Renders `types` of module `name` as an IL-like listing.
#[must_use]
pub fn render_module(registry: &MemberRegistry, name: &str, types: &[Token]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, ".module {name}");
    for ty in types {
        if registry.get_type(*ty).is_some_and(|ty| ty.enclosing.is_none()) {
            out.push('\n');
            render_type(registry, *ty, 0, &mut out);
        }
    }
    out
}

fn render_type(registry: &MemberRegistry, token: Token, depth: usize, out: &mut String) {
    let Some(ty) = registry.get_type(token) else {
        return;
    };
    let pad = INDENT.repeat(depth);
    let mut header = format!("{pad}.class ");
    if ty.enclosing.is_some() {
        header.push_str("nested ");
    }
    let _ = write!(header, "{}", ty.flags.visibility());
    if ty.flags.contains(TypeAttributes::INTERFACE) {
        header.push_str(" interface");
    }
    if ty.flags.contains(TypeAttributes::ABSTRACT) {
        header.push_str(" abstract");
    }
    if ty.flags.contains(TypeAttributes::SEALED) {
        header.push_str(" sealed");
    }
    let _ = write!(header, " {}", registry.display_name(token));
    if !ty.generic_params.is_empty() {
        let params: Vec<String> = ty
            .generic_params
            .iter()
            .map(|(_, param)| render_generic_param(registry, *param))
            .collect();
        let _ = write!(header, "<{}>", params.join(", "));
    }
    let _ = writeln!(out, "{header}");
    if let Some(base) = ty.base() {
        let _ = writeln!(out, "{pad}{INDENT}{INDENT}extends {}", registry.display_name(base));
    }
    for (_, interface) in ty.interfaces.iter() {
        let _ = writeln!(
            out,
            "{pad}{INDENT}{INDENT}implements {}",
            registry.display_name(*interface)
        );
    }
    let _ = writeln!(out, "{pad}{{");
    let inner = format!("{pad}{INDENT}");

    for (_, attribute) in ty.custom_attributes.iter() {
        let _ = writeln!(
            out,
            "{inner}.custom {}",
            registry.display_name(attribute.constructor)
        );
    }
    for (_, field) in ty.fields.iter() {
        if let Ok(field) = registry.field(*field) {
            let static_marker = if field.flags.contains(FieldAttributes::STATIC) {
                " static"
            } else {
                ""
            };
            let field_type = field
                .field_type()
                .map_or_else(|| "?".to_string(), |ty| registry.display_name(ty));
            let _ = writeln!(
                out,
                "{inner}.field {}{static_marker} {field_type} {}",
                field.flags.visibility(),
                field.name
            );
        }
    }
    for (_, method) in ty.methods.iter() {
        render_method(registry, *method, &inner, out);
    }
    for (_, property) in ty.properties.iter() {
        if let Some(Member::Property(property)) = registry.get(*property) {
            let property_type = property
                .property_type
                .get()
                .map_or_else(|| "?".to_string(), |ty| registry.display_name(*ty));
            let _ = writeln!(out, "{inner}.property {property_type} {}", property.name);
        }
    }
    for (_, event) in ty.events.iter() {
        if let Some(Member::Event(event)) = registry.get(*event) {
            let event_type = event
                .event_type
                .get()
                .map_or_else(|| "?".to_string(), |ty| registry.display_name(*ty));
            let _ = writeln!(out, "{inner}.event {event_type} {}", event.name);
        }
    }
    for (_, nested) in ty.nested.iter() {
        render_type(registry, *nested, depth + 1, out);
    }
    let _ = writeln!(out, "{pad}}}");
}

fn render_generic_param(registry: &MemberRegistry, param: Token) -> String {
    let Some(ty) = registry.get_type(param) else {
        return param.to_string();
    };
    if ty.constraints.is_empty() {
        return ty.name.clone();
    }
    let constraints: Vec<String> = ty
        .constraints
        .iter()
        .map(|(_, constraint)| registry.display_name(*constraint))
        .collect();
    format!("({}) {}", constraints.join(", "), ty.name)
}

fn render_method(registry: &MemberRegistry, token: Token, pad: &str, out: &mut String) {
    let Ok(method) = registry.method(token) else {
        return;
    };
    let mut header = format!("{pad}.method {}", method.flags.visibility());
    for (flag, word) in [
        (MethodAttributes::STATIC, " static"),
        (MethodAttributes::VIRTUAL, " virtual"),
        (MethodAttributes::ABSTRACT, " abstract"),
    ] {
        if method.flags.contains(flag) {
            header.push_str(word);
        }
    }
    if let Some(signature) = method.signature() {
        if signature.has_this {
            header.push_str(" instance");
        }
        let parameters: Vec<String> = signature
            .parameters
            .iter()
            .map(|ty| registry.display_name(*ty))
            .collect();
        let _ = write!(
            header,
            " {} {}({})",
            registry.display_name(signature.return_type),
            method.name,
            parameters.join(", ")
        );
    } else {
        let _ = write!(header, " {}", method.name);
    }
    let _ = writeln!(out, "{header}");

    let Some(body) = method.body() else {
        return;
    };
    let _ = writeln!(out, "{pad}{{");
    if !body.locals.is_empty() {
        let locals: Vec<String> = body
            .locals
            .iter()
            .enumerate()
            .map(|(index, local)| {
                let pinned = if local.pinned { " pinned" } else { "" };
                format!("{}{pinned} V_{index}", registry.display_name(local.ty))
            })
            .collect();
        let init = if body.init_locals { " init" } else { "" };
        let _ = writeln!(out, "{pad}{INDENT}.locals{init} ({})", locals.join(", "));
    }
    for instruction in &body.instructions {
        match instruction.member() {
            Some(member) if instruction.defined_label().is_none() => {
                let _ = writeln!(
                    out,
                    "{pad}{INDENT}{} {}",
                    instruction.opcode,
                    member_reference(registry, member)
                );
            }
            _ => {
                let _ = writeln!(out, "{pad}{INDENT}{instruction}");
            }
        }
    }
    let _ = writeln!(out, "{pad}}}");
}

/// Member operand as it appears in the listing; constructed types use their rendered shape
fn member_reference(registry: &MemberRegistry, member: Token) -> String {
    match registry.get(member) {
        Some(Member::Type(ty)) if matches!(ty.kind, TypeKind::GenericParameter { .. }) => {
            format!("!{}", ty.name)
        }
        Some(_) => registry.display_name(member),
        None => member.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::builder::{FieldBuilder, MethodBuilder, TypeBuilder},
        Result,
    };
    use std::sync::Arc;

    #[test]
    fn listing_nests_types_and_renders_bodies() -> Result<()> {
        let registry = Arc::new(MemberRegistry::new());
        let int32 = registry.core().int32;
        let outer = TypeBuilder::new(registry.clone(), "Demo.dll")
            .class("Demo", "Outer")
            .public()
            .build()?;
        let count = FieldBuilder::new(registry.clone(), outer.token, "count")
            .field_type(int32)
            .build()?
            .token;
        MethodBuilder::new(registry.clone(), outer.token, "Read")
            .flags(MethodAttributes::PUBLIC)
            .returns(int32)
            .implementation(move |asm| {
                asm.ldarg(0)?.ldfld(count)?.ret()?;
                Ok(())
            })
            .build()?;
        let inner = TypeBuilder::new(registry.clone(), "Demo.dll")
            .class("", "Inner")
            .nested_in(outer.token, TypeAttributes::NESTED_PRIVATE)
            .build()?;

        let listing = render_module(&registry, "Demo.dll", &[outer.token, inner.token]);
        assert!(listing.starts_with(".module Demo.dll\n"));
        assert!(listing.contains(".class public Demo.Outer"));
        assert!(listing.contains("  .class nested private Demo.Outer/Inner"));
        assert!(listing.contains(".field private System.Int32 count"));
        assert!(listing.contains("ldfld Demo.Outer::count"));
        assert_eq!(listing.matches(".class").count(), 2);
        Ok(())
    }
}
