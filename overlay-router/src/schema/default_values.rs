//! Default value literals must match the type they are declared for.
//!
//! Runs over argument definitions (on fields and directives) and input object
//! fields. Checks are done against the merged schema, so an extension may use
//! enum values or input types declared by the remote schema.

use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;

use crate::error::Diagnostic;
use crate::graphql::Location;

/// Check every default value of `schema`, returning one diagnostic per default
/// value that does not match its declared type.
pub(crate) fn validate(schema: &Schema) -> Vec<Diagnostic> {
    let mut checker = Checker {
        schema,
        diagnostics: Vec::new(),
    };

    for directive in schema.directive_definitions.values() {
        for argument in &directive.arguments {
            checker.input_value(
                &format!("@{}({}:)", directive.name, argument.name),
                argument,
            );
        }
    }

    for (type_name, ty) in &schema.types {
        if ty.is_built_in() {
            continue;
        }
        match ty {
            ExtendedType::Object(object) => {
                for (field_name, field) in &object.fields {
                    for argument in &field.arguments {
                        checker.input_value(
                            &format!("{type_name}.{field_name}({}:)", argument.name),
                            argument,
                        );
                    }
                }
            }
            ExtendedType::Interface(interface) => {
                for (field_name, field) in &interface.fields {
                    for argument in &field.arguments {
                        checker.input_value(
                            &format!("{type_name}.{field_name}({}:)", argument.name),
                            argument,
                        );
                    }
                }
            }
            ExtendedType::InputObject(input) => {
                for (field_name, field) in &input.fields {
                    checker.input_value(&format!("{type_name}.{field_name}"), field);
                }
            }
            _ => {}
        }
    }

    checker.diagnostics
}

struct Checker<'a> {
    schema: &'a Schema,
    diagnostics: Vec<Diagnostic>,
}

impl Checker<'_> {
    fn input_value(&mut self, coordinate: &str, definition: &ast::InputValueDefinition) {
        let Some(default_value) = &definition.default_value else {
            return;
        };
        if let Err(reason) = self.check(&definition.ty, default_value) {
            let locations = default_value
                .line_column_range(&self.schema.sources)
                .map(|range| Location {
                    line: range.start.line as u32,
                    column: range.start.column as u32,
                })
                .into_iter()
                .collect();
            self.diagnostics.push(Diagnostic::new(
                format!("invalid default value for `{coordinate}`: {reason}"),
                locations,
            ));
        }
    }

    fn check(&self, ty: &ast::Type, value: &Node<ast::Value>) -> Result<(), String> {
        if let ast::Value::Null = &**value {
            return if ty.is_non_null() {
                Err(format!("expected a value of type `{ty}`, found null"))
            } else {
                Ok(())
            };
        }
        if let ast::Value::Variable(name) = &**value {
            return Err(format!("variable `${name}` is not allowed in a default value"));
        }

        match ty {
            ast::Type::List(item) | ast::Type::NonNullList(item) => match &**value {
                ast::Value::List(items) => {
                    items.iter().try_for_each(|value| self.check(item, value))
                }
                // A single item coerces to a list of one.
                _ => self.check(item, value),
            },
            ast::Type::Named(name) | ast::Type::NonNullNamed(name) => self.named(name, value),
        }
    }

    fn named(&self, type_name: &str, value: &Node<ast::Value>) -> Result<(), String> {
        let mismatch = || {
            Err(format!(
                "expected a value of type `{type_name}`, found {}",
                &**value
            ))
        };
        // Undefined types are reported by schema validation.
        let Some(ty) = self.schema.types.get(type_name) else {
            return Ok(());
        };
        match ty {
            ExtendedType::Scalar(_) => match (type_name, &**value) {
                ("Int", ast::Value::Int(int)) => int
                    .try_to_i32()
                    .map(|_| ())
                    .map_err(|_| format!("{int} does not fit in a 32-bit integer")),
                ("Int", _) => mismatch(),
                ("Float", ast::Value::Int(_) | ast::Value::Float(_)) => Ok(()),
                ("Float", _) => mismatch(),
                ("String", ast::Value::String(_)) => Ok(()),
                ("String", _) => mismatch(),
                ("Boolean", ast::Value::Boolean(_)) => Ok(()),
                ("Boolean", _) => mismatch(),
                ("ID", ast::Value::String(_) | ast::Value::Int(_)) => Ok(()),
                ("ID", _) => mismatch(),
                // Custom scalars accept any literal.
                _ => Ok(()),
            },
            ExtendedType::Enum(enum_type) => match &**value {
                ast::Value::Enum(name) if enum_type.values.contains_key(name) => Ok(()),
                ast::Value::Enum(name) => Err(format!(
                    "value `{name}` does not exist in enum `{type_name}`"
                )),
                _ => mismatch(),
            },
            ExtendedType::InputObject(input) => {
                let ast::Value::Object(entries) = &**value else {
                    return mismatch();
                };
                for (name, value) in entries {
                    let Some(field) = input.fields.get(name) else {
                        return Err(format!(
                            "field `{name}` does not exist on input type `{type_name}`"
                        ));
                    };
                    self.check(&field.ty, value)?;
                }
                for (name, field) in &input.fields {
                    let provided = entries.iter().any(|(entry, _)| entry == name);
                    if !provided && field.ty.is_non_null() && field.default_value.is_none() {
                        return Err(format!(
                            "required field `{name}` of input type `{type_name}` is missing"
                        ));
                    }
                }
                Ok(())
            }
            // Output types used as input are reported by schema validation.
            _ => Ok(()),
        }
    }
}
