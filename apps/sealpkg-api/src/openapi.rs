use serde_json::{Value, json};

fn json_body(schema: Value) -> Value {
    json!({
        "content": {
            "application/json": { "schema": schema },
        },
    })
}

fn ok(description: &str, schema: Value) -> Value {
    let mut response = json_body(schema);
    response["description"] = json!(description);
    response
}

fn error_responses(codes: &[&str]) -> Value {
    let mut responses = json!({});
    for code in codes {
        responses[*code] = ok("Error", json!({ "$ref": "#/components/schemas/Error" }));
    }
    responses
}

fn with_errors(success: Value, codes: &[&str]) -> Value {
    let mut responses = error_responses(codes);
    responses["200"] = success;
    responses
}

fn id_body_operation(summary: &str, result: &str, codes: &[&str]) -> Value {
    json!({
        "post": {
            "summary": summary,
            "parameters": [{ "$ref": "#/components/parameters/IdQuery" }],
            "requestBody": {
                "required": false,
                "content": {
                    "application/json": {
                        "schema": { "$ref": "#/components/schemas/IdRequest" },
                    },
                },
            },
            "responses": with_errors(
                ok("Outcome", json!({ "$ref": format!("#/components/schemas/{result}") })),
                codes,
            ),
        },
    })
}

pub fn openapi_spec() -> Value {
    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "sealpkg Package Manager API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Install, enable, configure, and reload extension packages. \
                Package ids contain a slash: send them percent-encoded in the path \
                or as the `id` query parameter, which takes precedence.",
        },
        "paths": {
            "/healthz": {
                "get": {
                    "summary": "Health check",
                    "responses": {
                        "200": ok("Service health", json!({
                            "type": "object",
                            "required": ["status", "service"],
                            "properties": {
                                "status": { "type": "string" },
                                "service": { "type": "string" },
                            },
                        })),
                    },
                },
            },
            "/openapi.json": {
                "get": {
                    "summary": "This document",
                    "responses": {
                        "200": ok("OpenAPI 3.1 document", json!({ "type": "object" })),
                    },
                },
            },
            "/package/list": {
                "get": {
                    "summary": "List installed packages",
                    "responses": {
                        "200": ok("Installed packages sorted by id", json!({
                            "type": "array",
                            "items": { "$ref": "#/components/schemas/PackageInstance" },
                        })),
                    },
                },
            },
            "/package/{id}": {
                "get": {
                    "summary": "Get one package",
                    "parameters": [
                        { "$ref": "#/components/parameters/IdPath" },
                        { "$ref": "#/components/parameters/IdQuery" },
                    ],
                    "responses": with_errors(
                        ok("Package instance", json!({ "$ref": "#/components/schemas/PackageInstance" })),
                        &["404"],
                    ),
                },
            },
            "/package/install": {
                "post": {
                    "summary": "Install from a server-local archive",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "required": ["path"],
                                    "properties": { "path": { "type": "string" } },
                                },
                            },
                        },
                    },
                    "responses": with_errors(
                        ok("Outcome", json!({ "$ref": "#/components/schemas/OperationOutcome" })),
                        &["400", "409", "500"],
                    ),
                },
            },
            "/package/install-from-url": {
                "post": {
                    "summary": "Download an archive and install it",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "required": ["url"],
                                    "properties": { "url": { "type": "string", "format": "uri" } },
                                },
                            },
                        },
                    },
                    "responses": with_errors(
                        ok("Outcome", json!({ "$ref": "#/components/schemas/OperationOutcome" })),
                        &["400", "409", "502"],
                    ),
                },
            },
            "/package/uninstall": {
                "post": {
                    "summary": "Uninstall a package",
                    "parameters": [{ "$ref": "#/components/parameters/IdQuery" }],
                    "requestBody": {
                        "required": false,
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "properties": {
                                        "id": { "type": "string" },
                                        "mode": {
                                            "type": "string",
                                            "enum": ["full", "keep_data", "disable_only"],
                                            "default": "full",
                                        },
                                    },
                                },
                            },
                        },
                    },
                    "responses": with_errors(
                        ok("Outcome", json!({ "$ref": "#/components/schemas/OperationOutcome" })),
                        &["400", "404", "409"],
                    ),
                },
            },
            "/package/enable": id_body_operation("Enable a package and its dependencies", "OperationOutcome", &["400", "404", "409"]),
            "/package/disable": id_body_operation("Disable a package", "OperationOutcome", &["400", "404", "409"]),
            "/package/reload": id_body_operation("Reload one package's resources", "ReloadOutcome", &["400", "404"]),
            "/package/reload-all": {
                "post": {
                    "summary": "Reload every resource kind used by enabled packages",
                    "responses": with_errors(
                        ok("Outcome", json!({ "$ref": "#/components/schemas/ReloadOutcome" })),
                        &["500"],
                    ),
                },
            },
            "/package/{id}/config": {
                "get": {
                    "summary": "Current config values",
                    "parameters": [
                        { "$ref": "#/components/parameters/IdPath" },
                        { "$ref": "#/components/parameters/IdQuery" },
                    ],
                    "responses": with_errors(
                        ok("Config map", json!({ "$ref": "#/components/schemas/ConfigMap" })),
                        &["404"],
                    ),
                },
                "post": {
                    "summary": "Validate and store config values",
                    "parameters": [
                        { "$ref": "#/components/parameters/IdPath" },
                        { "$ref": "#/components/parameters/IdQuery" },
                    ],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/ConfigMap" },
                            },
                        },
                    },
                    "responses": with_errors(
                        ok("Accepted config with defaults filled in", json!({ "$ref": "#/components/schemas/ConfigMap" })),
                        &["400", "404", "409"],
                    ),
                },
            },
            "/package/{id}/config-schema": {
                "get": {
                    "summary": "Declared config schema",
                    "parameters": [
                        { "$ref": "#/components/parameters/IdPath" },
                        { "$ref": "#/components/parameters/IdQuery" },
                    ],
                    "responses": with_errors(
                        ok("Schema per key", json!({
                            "type": "object",
                            "additionalProperties": { "$ref": "#/components/schemas/ConfigFieldSchema" },
                        })),
                        &["404", "409"],
                    ),
                },
            },
        },
        "components": {
            "parameters": {
                "IdPath": {
                    "name": "id",
                    "in": "path",
                    "required": true,
                    "description": "Package id, percent-encoded (`author%2Fname`).",
                    "schema": { "type": "string" },
                },
                "IdQuery": {
                    "name": "id",
                    "in": "query",
                    "required": false,
                    "description": "Package id (`author/name`); overrides the path or body id.",
                    "schema": { "type": "string" },
                },
            },
            "schemas": {
                "Error": {
                    "type": "object",
                    "required": ["error"],
                    "properties": { "error": { "type": "string" } },
                },
                "IdRequest": {
                    "type": "object",
                    "properties": { "id": { "type": "string" } },
                },
                "PackageState": {
                    "type": "string",
                    "enum": ["installed", "enabled", "disabled", "error"],
                },
                "ResourceKind": {
                    "type": "string",
                    "enum": ["scripts", "decks", "reply", "helpdoc", "template"],
                },
                "ConfigMap": {
                    "type": "object",
                    "additionalProperties": true,
                },
                "ConfigFieldSchema": {
                    "type": "object",
                    "required": ["type"],
                    "properties": {
                        "type": {
                            "type": "string",
                            "enum": ["string", "integer", "number", "boolean", "array", "object"],
                        },
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "default": {},
                        "secret": { "type": "boolean" },
                        "min": { "type": "number" },
                        "max": { "type": "number" },
                        "enum": { "type": "array" },
                        "items": { "$ref": "#/components/schemas/ConfigFieldSchema" },
                        "properties": {
                            "type": "object",
                            "additionalProperties": { "$ref": "#/components/schemas/ConfigFieldSchema" },
                        },
                    },
                },
                "PackageInstance": {
                    "type": "object",
                    "required": ["id", "state", "install_time", "updated_at", "install_path", "source_path", "user_data_path", "config", "pending_reload"],
                    "properties": {
                        "id": { "type": "string" },
                        "manifest": {
                            "type": ["object", "null"],
                            "description": "Parsed manifest.toml; null when it failed to re-parse at startup.",
                        },
                        "state": { "$ref": "#/components/schemas/PackageState" },
                        "install_time": { "type": "string", "format": "date-time" },
                        "updated_at": { "type": "string", "format": "date-time" },
                        "install_path": { "type": "string" },
                        "source_path": { "type": "string" },
                        "user_data_path": { "type": "string" },
                        "checksum": { "type": "string" },
                        "config": { "$ref": "#/components/schemas/ConfigMap" },
                        "err_text": { "type": "string" },
                        "pending_reload": {
                            "type": "array",
                            "items": { "$ref": "#/components/schemas/ResourceKind" },
                        },
                    },
                },
                "OperationOutcome": {
                    "type": "object",
                    "required": ["success", "message", "reload_needed", "reload_hints"],
                    "properties": {
                        "success": { "type": "boolean" },
                        "message": { "type": "string" },
                        "reload_needed": { "type": "boolean" },
                        "reload_hints": {
                            "type": "array",
                            "items": { "$ref": "#/components/schemas/ResourceKind" },
                        },
                    },
                },
                "ReloadOutcome": {
                    "type": "object",
                    "required": ["success", "message", "reloaded_items", "need_restart", "restart_hints"],
                    "properties": {
                        "success": { "type": "boolean" },
                        "message": { "type": "string" },
                        "reloaded_items": {
                            "type": "object",
                            "additionalProperties": { "type": "string" },
                        },
                        "need_restart": { "type": "boolean" },
                        "restart_hints": {
                            "type": "array",
                            "items": { "$ref": "#/components/schemas/ResourceKind" },
                        },
                    },
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::openapi_spec;

    #[test]
    fn openapi_spec_declares_31_and_package_routes() {
        let spec = openapi_spec();
        assert_eq!(spec["openapi"], "3.1.0");
        assert!(spec["paths"]["/openapi.json"].is_object());
        assert!(spec["paths"]["/package/{id}/config"]["post"].is_object());
        assert!(spec["paths"]["/package/enable"]["post"]["responses"]["409"].is_object());
        assert!(spec["paths"]["/package/reload"]["post"]["responses"]["200"].is_object());
        assert!(spec["components"]["parameters"]["IdQuery"].is_object());
        assert_eq!(spec["paths"]["/package/enable"]["post"]["requestBody"]["required"], false);
        assert!(spec["components"]["schemas"]["ReloadOutcome"].is_object());
    }
}
