//! TypeScript signatures derived from tool JSON Schemas.
//!
//! A schema is first compiled into a named declaration (`export type` for
//! anything that is not a plain object, `export interface` otherwise), then
//! the declaration is flattened into an inline type so every tool reads as a
//! single `function name(args: {...}): Promise<...>;` line.

use serde_json::{Map, Value};

use codemode_core::{Error, OutputSchema, Result, ToolGroup, ToolMeta};

// =============================================================================
// Declarations
// =============================================================================

/// Compile a schema into a named TypeScript declaration.
pub fn compile_declaration(schema: &Value, type_name: &str) -> Result<String> {
    let mut ctx = Context::new(schema);

    if let Some(obj) = interface_candidate(schema) {
        let members = ctx.members(obj)?;
        let mut out = format!("export interface {} {{\n", type_name);
        for member in members {
            if let Some(description) = &member.description {
                out.push_str(&format!("  /** {} */\n", comment_safe(description).replace('\n', " ")));
            }
            out.push_str(&format!("  {};\n", member.render()));
        }
        out.push('}');
        return Ok(out);
    }

    Ok(format!("export type {} = {};", type_name, ctx.ts_type(schema)?))
}

/// Flatten a declaration into an inline type.
///
/// An alias yields its right-hand side. An interface yields its member list
/// as `{ a: T; b?: U }` with comments and layout dropped.
pub fn inline_declaration(declaration: &str) -> String {
    let declaration = declaration.trim();

    if declaration.starts_with("export type") {
        let rhs = declaration
            .split_once('=')
            .map(|(_, rhs)| rhs)
            .unwrap_or_default();
        return rhs.trim().trim_end_matches(';').trim().to_string();
    }

    let (Some(open), Some(close)) = (declaration.find('{'), declaration.rfind('}')) else {
        return "unknown".to_string();
    };
    let members: Vec<&str> = declaration[open + 1..close]
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !(line.starts_with("/*") || line.starts_with('*') || line.starts_with("//")))
        .map(|line| line.trim_end_matches(';').trim())
        .collect();

    if members.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {} }}", members.join("; "))
    }
}

/// Inline TypeScript type for a tool's input.
pub fn input_type(schema: &Value) -> Result<String> {
    Ok(inline_declaration(&compile_declaration(schema, "Input")?))
}

/// Inline TypeScript type for a tool's result.
pub fn output_type(output: &OutputSchema) -> Result<String> {
    match output {
        OutputSchema::Null => Ok("void".to_string()),
        OutputSchema::Unspecified => Ok("Record<string, unknown>".to_string()),
        OutputSchema::Schema(Value::Object(obj)) if obj.is_empty() => Ok("void".to_string()),
        OutputSchema::Schema(schema) => Ok(inline_declaration(&compile_declaration(
            schema, "Output",
        )?)),
    }
}

// =============================================================================
// Tool Signatures
// =============================================================================

/// Rendered signature of one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSignature {
    pub identifier: String,
    /// JSDoc block, when the tool or any parameter has a description.
    pub doc: Option<String>,
    pub declaration: String,
}

impl ToolSignature {
    pub fn render(&self) -> String {
        match &self.doc {
            Some(doc) => format!("{}\n{}", doc, self.declaration),
            None => self.declaration.clone(),
        }
    }
}

/// Build the signature of one tool.
pub fn tool_signature(meta: &ToolMeta) -> Result<ToolSignature> {
    let build = || -> Result<ToolSignature> {
        let input = input_type(&meta.input_schema)?;
        let output = output_type(&meta.output_schema)?;
        let args = if has_required(&meta.input_schema) {
            "args"
        } else {
            "args?"
        };

        Ok(ToolSignature {
            identifier: meta.identifier.clone(),
            doc: doc_comment(&meta.description, &meta.input_schema),
            declaration: format!(
                "function {}({}: {}): Promise<{}>;",
                meta.identifier, args, input, output
            ),
        })
    };

    build().map_err(|e| match e {
        Error::Schema(msg) => Error::schema(format!("{}: {}", meta.reference_name, msg)),
        other => other,
    })
}

/// `declare namespace <local_name> { ... }` for a group of tools.
pub fn render_namespace(group: &ToolGroup) -> Result<String> {
    let mut out = format!("declare namespace {} {{\n", group.local_name);
    for (i, tool) in group.tools.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for line in tool_signature(tool)?.render().lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push('}');
    Ok(out)
}

/// Namespace blocks for several groups, separated by blank lines.
pub fn render_namespaces(groups: &[ToolGroup]) -> Result<String> {
    let blocks = groups
        .iter()
        .map(render_namespace)
        .collect::<Result<Vec<_>>>()?;
    Ok(blocks.join("\n\n"))
}

fn has_required(schema: &Value) -> bool {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map_or(false, |required| !required.is_empty())
}

fn doc_comment(description: &str, input_schema: &Value) -> Option<String> {
    let mut lines: Vec<String> = description
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(comment_safe)
        .collect();

    if let Some(properties) = input_schema.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            if let Some(text) = property.get("description").and_then(Value::as_str) {
                lines.push(format!(
                    "@param args.{} - {}",
                    name,
                    comment_safe(text).replace('\n', " ")
                ));
            }
        }
    }

    if lines.is_empty() {
        return None;
    }
    let mut doc = String::from("/**\n");
    for line in lines {
        doc.push_str(" * ");
        doc.push_str(&line);
        doc.push('\n');
    }
    doc.push_str(" */");
    Some(doc)
}

fn comment_safe(text: &str) -> String {
    text.replace("*/", "*\\/")
}

// =============================================================================
// Schema Compilation
// =============================================================================

struct Member {
    key: String,
    optional: bool,
    ty: String,
    description: Option<String>,
}

impl Member {
    fn render(&self) -> String {
        format!(
            "{}{}: {}",
            self.key,
            if self.optional { "?" } else { "" },
            self.ty
        )
    }
}

/// Schemas rendered as interfaces: objects with at least one property.
fn interface_candidate(schema: &Value) -> Option<&Map<String, Value>> {
    let obj = schema.as_object()?;
    let is_object = match obj.get("type") {
        Some(Value::String(t)) => t == "object",
        None => !obj.contains_key("$ref") && !has_combinator(obj),
        _ => false,
    };
    let has_properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .map_or(false, |props| !props.is_empty());
    (is_object && has_properties && !obj.contains_key("enum") && !obj.contains_key("const"))
        .then_some(obj)
}

fn has_combinator(obj: &Map<String, Value>) -> bool {
    ["anyOf", "oneOf", "allOf"]
        .iter()
        .any(|key| obj.contains_key(*key))
}

struct Context<'a> {
    root: &'a Value,
    /// `$ref`s currently being expanded.
    expanding: Vec<String>,
}

impl<'a> Context<'a> {
    fn new(root: &'a Value) -> Self {
        Self {
            root,
            expanding: Vec::new(),
        }
    }

    fn ts_type(&mut self, schema: &Value) -> Result<String> {
        let obj = match schema {
            Value::Bool(true) => return Ok("unknown".to_string()),
            Value::Bool(false) => return Ok("never".to_string()),
            Value::Object(obj) => obj,
            other => {
                return Err(Error::schema(format!(
                    "expected a schema object, found {}",
                    other
                )))
            }
        };

        let ty = self.base_type(obj)?;
        if obj.get("nullable") == Some(&Value::Bool(true)) && ty != "null" {
            return Ok(format!("{} | null", ty));
        }
        Ok(ty)
    }

    fn base_type(&mut self, obj: &Map<String, Value>) -> Result<String> {
        if let Some(reference) = obj.get("$ref") {
            return self.resolve_ref(reference);
        }
        if let Some(value) = obj.get("const") {
            return Ok(literal(value));
        }
        if let Some(values) = obj.get("enum") {
            let values = values
                .as_array()
                .ok_or_else(|| Error::schema("'enum' must be an array"))?;
            if values.is_empty() {
                return Ok("never".to_string());
            }
            return Ok(union(values.iter().map(literal).collect()));
        }
        for key in ["anyOf", "oneOf"] {
            if let Some(variants) = obj.get(key) {
                let parts = self.schema_list(variants, key)?;
                return Ok(union(parts));
            }
        }
        if let Some(variants) = obj.get("allOf") {
            let parts = self.schema_list(variants, "allOf")?;
            return Ok(parts
                .iter()
                .map(|p| parenthesize(p))
                .collect::<Vec<_>>()
                .join(" & "));
        }

        match obj.get("type") {
            Some(Value::String(t)) => self.keyword_type(t, obj),
            Some(Value::Array(types)) => {
                let mut parts = Vec::with_capacity(types.len());
                for t in types {
                    let t = t
                        .as_str()
                        .ok_or_else(|| Error::schema("'type' entries must be strings"))?;
                    parts.push(self.keyword_type(t, obj)?);
                }
                Ok(union(parts))
            }
            Some(other) => Err(Error::schema(format!("invalid 'type': {}", other))),
            None if obj.contains_key("properties") || obj.contains_key("additionalProperties") => {
                self.object_type(obj)
            }
            None if obj.contains_key("items") || obj.contains_key("prefixItems") => {
                self.array_type(obj)
            }
            None => Ok("unknown".to_string()),
        }
    }

    fn keyword_type(&mut self, keyword: &str, obj: &Map<String, Value>) -> Result<String> {
        match keyword {
            "string" => Ok("string".to_string()),
            "number" | "integer" => Ok("number".to_string()),
            "boolean" => Ok("boolean".to_string()),
            "null" => Ok("null".to_string()),
            "array" => self.array_type(obj),
            "object" => self.object_type(obj),
            other => Err(Error::schema(format!("unknown type '{}'", other))),
        }
    }

    fn array_type(&mut self, obj: &Map<String, Value>) -> Result<String> {
        let tuple = obj.get("prefixItems").or_else(|| match obj.get("items") {
            Some(items @ Value::Array(_)) => Some(items),
            _ => None,
        });
        if let Some(Value::Array(items)) = tuple {
            let parts = items
                .iter()
                .map(|item| self.ts_type(item))
                .collect::<Result<Vec<_>>>()?;
            return Ok(format!("[{}]", parts.join(", ")));
        }

        match obj.get("items") {
            None => Ok("unknown[]".to_string()),
            Some(items) => Ok(format!("{}[]", parenthesize(&self.ts_type(items)?))),
        }
    }

    fn object_type(&mut self, obj: &Map<String, Value>) -> Result<String> {
        let members = self.members(obj)?;
        if members.is_empty() {
            return Ok(match obj.get("additionalProperties") {
                Some(Value::Bool(false)) => "{}".to_string(),
                Some(schema @ Value::Object(_)) => {
                    format!("Record<string, {}>", self.ts_type(schema)?)
                }
                _ => "Record<string, unknown>".to_string(),
            });
        }
        let rendered: Vec<String> = members.iter().map(Member::render).collect();
        Ok(format!("{{ {} }}", rendered.join("; ")))
    }

    /// Property members of an object schema, plus an index signature when
    /// extra keys are explicitly allowed.
    fn members(&mut self, obj: &Map<String, Value>) -> Result<Vec<Member>> {
        let properties = match obj.get("properties") {
            None => None,
            Some(Value::Object(props)) => Some(props),
            Some(_) => return Err(Error::schema("'properties' must be an object")),
        };
        let required: Vec<&str> = match obj.get("required") {
            None => Vec::new(),
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str()
                        .ok_or_else(|| Error::schema("'required' entries must be strings"))
                })
                .collect::<Result<_>>()?,
            Some(_) => return Err(Error::schema("'required' must be an array")),
        };

        let mut members = Vec::new();
        let Some(properties) = properties else {
            return Ok(members);
        };
        if properties.is_empty() {
            return Ok(members);
        }

        for (name, property) in properties {
            members.push(Member {
                key: property_key(name),
                optional: !required.contains(&name.as_str()),
                ty: self.ts_type(property)?,
                description: property
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        let index = match obj.get("additionalProperties") {
            Some(Value::Bool(true)) => Some("unknown".to_string()),
            Some(schema @ Value::Object(_)) => Some(self.ts_type(schema)?),
            _ => None,
        };
        if let Some(ty) = index {
            members.push(Member {
                key: "[key: string]".to_string(),
                optional: false,
                ty,
                description: None,
            });
        }
        Ok(members)
    }

    fn schema_list(&mut self, value: &Value, keyword: &str) -> Result<Vec<String>> {
        let schemas = value
            .as_array()
            .ok_or_else(|| Error::schema(format!("'{}' must be an array", keyword)))?;
        schemas.iter().map(|s| self.ts_type(s)).collect()
    }

    fn resolve_ref(&mut self, reference: &Value) -> Result<String> {
        let reference = reference
            .as_str()
            .ok_or_else(|| Error::schema("'$ref' must be a string"))?;
        let pointer = reference
            .strip_prefix('#')
            .ok_or_else(|| Error::schema(format!("unsupported $ref '{}'", reference)))?;

        // Recursive types cannot be inlined.
        if self.expanding.iter().any(|r| r == reference) {
            return Ok("unknown".to_string());
        }
        let target = self
            .root
            .pointer(pointer)
            .ok_or_else(|| Error::schema(format!("unresolvable $ref '{}'", reference)))?;

        self.expanding.push(reference.to_string());
        let resolved = self.ts_type(target);
        self.expanding.pop();
        resolved
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Object(_) | Value::Array(_) => "unknown".to_string(),
        scalar => scalar.to_string(),
    }
}

fn union(parts: Vec<String>) -> String {
    let mut unique: Vec<String> = Vec::with_capacity(parts.len());
    for part in parts {
        if !unique.contains(&part) {
            unique.push(part);
        }
    }
    if unique.is_empty() {
        return "never".to_string();
    }
    unique.join(" | ")
}

fn parenthesize(ty: &str) -> String {
    if ty.contains(" | ") || ty.contains(" & ") {
        format!("({})", ty)
    } else {
        ty.to_string()
    }
}

fn property_key(name: &str) -> String {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_' || first == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        None => false,
    };
    if valid {
        name.to_string()
    } else {
        Value::String(name.to_string()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(name: &str, description: &str, input: Value, output: OutputSchema) -> ToolMeta {
        ToolMeta::build("main", name, Some(description.to_string()), Some(input), output).unwrap()
    }

    fn add_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number", "description": "First operand"},
                "b": {"type": "number"}
            },
            "required": ["a", "b"]
        })
    }

    #[test]
    fn test_interface_is_inlined() {
        let declaration = compile_declaration(&add_schema(), "Input").unwrap();
        assert!(declaration.starts_with("export interface Input {"));
        assert!(declaration.contains("/** First operand */"));
        assert_eq!(inline_declaration(&declaration), "{ a: number; b: number }");
    }

    #[test]
    fn test_alias_is_inlined() {
        let declaration =
            compile_declaration(&json!({"type": ["string", "number"]}), "Output").unwrap();
        assert_eq!(declaration, "export type Output = string | number;");
        assert_eq!(inline_declaration(&declaration), "string | number");
    }

    #[test]
    fn test_optional_members() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "string"}},
            "required": ["a"]
        });
        assert_eq!(input_type(&schema).unwrap(), "{ a: number; b?: string }");
    }

    #[test]
    fn test_output_tri_state() {
        assert_eq!(output_type(&OutputSchema::Null).unwrap(), "void");
        assert_eq!(
            output_type(&OutputSchema::Unspecified).unwrap(),
            "Record<string, unknown>"
        );
        assert_eq!(output_type(&OutputSchema::Schema(json!({}))).unwrap(), "void");
        assert_eq!(
            output_type(&OutputSchema::Schema(json!({"type": "number"}))).unwrap(),
            "number"
        );
    }

    #[test]
    fn test_tool_signature_with_docs() {
        let tool = meta(
            "add",
            "Add two numbers",
            add_schema(),
            OutputSchema::Schema(json!({"type": "number"})),
        );
        let signature = tool_signature(&tool).unwrap();

        assert_eq!(
            signature.declaration,
            "function add(args: { a: number; b: number }): Promise<number>;"
        );
        let doc = signature.doc.unwrap();
        assert!(doc.contains(" * Add two numbers"));
        assert!(doc.contains("@param args.a - First operand"));
        assert!(!doc.contains("args.b"));
    }

    #[test]
    fn test_permissive_input_is_optional_record() {
        let tool = ToolMeta::build("main", "ping", None, None, OutputSchema::Null).unwrap();
        let signature = tool_signature(&tool).unwrap();
        assert_eq!(
            signature.declaration,
            "function ping(args?: Record<string, unknown>): Promise<void>;"
        );
        assert!(signature.doc.is_none());
    }

    #[test]
    fn test_constructs() {
        let schema = json!({
            "type": "object",
            "properties": {
                "mode": {"enum": ["fast", "slow"]},
                "tags": {"type": "array", "items": {"anyOf": [{"type": "string"}, {"type": "number"}]}},
                "pair": {"type": "array", "items": [{"type": "string"}, {"type": "boolean"}]},
                "note": {"type": "string", "nullable": true},
                "kind": {"const": "x"},
                "content-type": {"type": "string"},
                "meta": {"type": "object", "additionalProperties": {"type": "integer"}},
                "both": {"allOf": [{"type": "object", "properties": {"a": {"type": "string"}}, "required": ["a"]},
                                   {"type": "object", "properties": {"b": {"type": "number"}}}]}
            }
        });
        let ty = input_type(&schema).unwrap();
        assert!(ty.contains(r#"mode?: "fast" | "slow""#));
        assert!(ty.contains("tags?: (string | number)[]"));
        assert!(ty.contains("pair?: [string, boolean]"));
        assert!(ty.contains("note?: string | null"));
        assert!(ty.contains(r#"kind?: "x""#));
        assert!(ty.contains(r#""content-type"?: string"#));
        assert!(ty.contains("meta?: Record<string, number>"));
        assert!(ty.contains("both?: { a: string } & { b?: number }"));
    }

    #[test]
    fn test_refs_resolved_and_recursion_guarded() {
        let schema = json!({
            "type": "object",
            "properties": {
                "point": {"$ref": "#/definitions/Point"},
                "tree": {"$ref": "#/$defs/Node"}
            },
            "definitions": {
                "Point": {"type": "object", "properties": {"x": {"type": "number"}}, "required": ["x"]}
            },
            "$defs": {
                "Node": {"type": "object", "properties": {"children": {"type": "array", "items": {"$ref": "#/$defs/Node"}}}}
            }
        });
        let ty = input_type(&schema).unwrap();
        assert!(ty.contains("point?: { x: number }"));
        assert!(ty.contains("tree?: { children?: unknown[] }"));
    }

    #[test]
    fn test_malformed_schemas_fail() {
        let bad_properties = json!({"type": "object", "properties": ["a"]});
        assert!(matches!(input_type(&bad_properties), Err(Error::Schema(_))));

        let bad_ref = json!({"type": "object", "properties": {"a": {"$ref": "#/definitions/Nope"}}});
        assert!(matches!(input_type(&bad_ref), Err(Error::Schema(_))));
    }

    #[test]
    fn test_namespace_block() {
        let group = ToolGroup::new(
            "main",
            "main",
            vec![
                meta("add", "Add", add_schema(), OutputSchema::Null),
                ToolMeta::build("main", "ping", None, None, OutputSchema::Null).unwrap(),
            ],
        );
        let block = render_namespace(&group).unwrap();

        assert!(block.starts_with("declare namespace main {\n  /**\n"));
        assert!(block.contains("\n  function add(args: { a: number; b: number }): Promise<void>;\n"));
        assert!(block.contains("\n\n  function ping(args?: Record<string, unknown>): Promise<void>;\n"));
        assert!(block.ends_with('}'));
    }

    #[test]
    fn test_signature_error_names_the_tool() {
        let tool = meta(
            "broken",
            "",
            json!({"type": "object"}),
            OutputSchema::Schema(json!({"$ref": "#/missing"})),
        );
        let err = tool_signature(&tool).unwrap_err();
        assert!(err.to_string().contains("main.broken"));
    }
}
