//! Engine bridge that runs an external geoprocessing executable per call.
//!
//! Each primitive is executed as `<program> <args...> <operation>` with a JSON
//! request written to stdin. The executable answers on stdout with either
//! `{"status": "ok", "result": ...}` or
//! `{"status": "error", "message": "...", "kind": "general" | "topology"}`.

use super::{
    EliminateOptions, EngineResult, FeatureClassEntry, FieldExpression, FieldType, GeoEngine,
    LayerRef, MaskCondition, Predicate, RasterRef, Selection, VectorRef, Workspace,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineErrorKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};

/// Request payloads, one variant per engine operation.
#[derive(Serialize)]
#[serde(untagged)]
enum Request<'a> {
    InWorkspace {
        workspace: &'a Workspace,
    },
    Combine {
        rasters: &'a [RasterRef],
        out: &'a RasterRef,
    },
    AddField {
        table: &'a RasterRef,
        name: &'a str,
        field_type: FieldType,
    },
    Table {
        table: &'a RasterRef,
    },
    CalculateField {
        table: &'a RasterRef,
        field: &'a str,
        expression: &'a FieldExpression,
    },
    SetNull {
        input: &'a RasterRef,
        condition: &'a MaskCondition,
        where_clause: String,
        out: &'a RasterRef,
    },
    RasterToPolygon {
        input: &'a RasterRef,
        out: &'a VectorRef,
    },
    Project {
        input: &'a VectorRef,
        out: &'a VectorRef,
        target_crs: &'a str,
    },
    Select {
        layer: &'a LayerRef,
        predicate: Predicate,
        where_clause: String,
    },
    Eliminate {
        selection: &'a Selection,
        where_clause: String,
        out: &'a VectorRef,
        options: &'a EliminateOptions,
    },
    MakeFeatureLayer {
        source: &'a VectorRef,
        name: &'a str,
    },
    Count {
        selection: &'a Selection,
        where_clause: String,
    },
    Feature {
        feature: &'a VectorRef,
    },
    Export {
        selection: &'a Selection,
        where_clause: String,
        out: &'a VectorRef,
    },
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Reply {
    Ok {
        #[serde(default)]
        result: serde_json::Value,
    },
    Error {
        message: String,
        #[serde(default = "default_kind")]
        kind: EngineErrorKind,
    },
}

fn default_kind() -> EngineErrorKind {
    EngineErrorKind::General
}

/// [`GeoEngine`] backed by an external executable.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    /// Run one operation and decode its result.
    fn call<T: DeserializeOwned>(&self, operation: &str, request: &Request<'_>) -> EngineResult<T> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| EngineError::general(operation, format!("failed to encode request: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(operation)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EngineError::general(operation, format!("failed to start {}: {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload) {
                // The engine went away mid-request; reap it before reporting.
                drop(stdin);
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::general(operation, format!("failed to send request: {}", e)));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| EngineError::general(operation, format!("engine did not finish: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::general(
                operation,
                format!("engine exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let reply: Reply = serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::general(operation, format!("malformed engine reply: {}", e)))?;

        match reply {
            Reply::Ok { result } => serde_json::from_value(result)
                .map_err(|e| EngineError::general(operation, format!("unexpected result: {}", e))),
            Reply::Error { message, kind } => Err(EngineError {
                operation: operation.to_string(),
                kind,
                message,
            }),
        }
    }
}

impl GeoEngine for CommandEngine {
    fn create_workspace(&self, workspace: &Workspace) -> EngineResult<()> {
        self.call("create_workspace", &Request::InWorkspace { workspace })
    }

    fn combine(&self, rasters: &[RasterRef], out: &RasterRef) -> EngineResult<()> {
        self.call("combine", &Request::Combine { rasters, out })
    }

    fn add_field(&self, table: &RasterRef, name: &str, field_type: FieldType) -> EngineResult<()> {
        self.call(
            "add_field",
            &Request::AddField {
                table,
                name,
                field_type,
            },
        )
    }

    fn list_fields(&self, table: &RasterRef) -> EngineResult<Vec<String>> {
        self.call("list_fields", &Request::Table { table })
    }

    fn calculate_field(
        &self,
        table: &RasterRef,
        field: &str,
        expression: &FieldExpression,
    ) -> EngineResult<()> {
        self.call(
            "calculate_field",
            &Request::CalculateField {
                table,
                field,
                expression,
            },
        )
    }

    fn set_null(&self, input: &RasterRef, condition: &MaskCondition, out: &RasterRef) -> EngineResult<()> {
        self.call(
            "set_null",
            &Request::SetNull {
                input,
                condition,
                where_clause: condition.where_clause(),
                out,
            },
        )
    }

    fn raster_to_polygon(&self, input: &RasterRef, out: &VectorRef) -> EngineResult<()> {
        self.call("raster_to_polygon", &Request::RasterToPolygon { input, out })
    }

    fn project(&self, input: &VectorRef, out: &VectorRef, target_crs: &str) -> EngineResult<()> {
        self.call(
            "project",
            &Request::Project {
                input,
                out,
                target_crs,
            },
        )
    }

    fn select_by_attribute(&self, layer: &LayerRef, predicate: Predicate) -> EngineResult<Selection> {
        self.call::<()>(
            "select_by_attribute",
            &Request::Select {
                layer,
                predicate,
                where_clause: predicate.where_clause(),
            },
        )?;
        Ok(Selection {
            layer: layer.clone(),
            predicate,
        })
    }

    fn eliminate(
        &self,
        selection: &Selection,
        out: &VectorRef,
        options: &EliminateOptions,
    ) -> EngineResult<()> {
        self.call(
            "eliminate",
            &Request::Eliminate {
                selection,
                where_clause: selection.predicate.where_clause(),
                out,
                options,
            },
        )
    }

    fn make_feature_layer(&self, source: &VectorRef, name: &str) -> EngineResult<LayerRef> {
        self.call::<()>("make_feature_layer", &Request::MakeFeatureLayer { source, name })?;
        Ok(LayerRef {
            name: name.to_string(),
            source: source.clone(),
        })
    }

    fn count(&self, selection: &Selection) -> EngineResult<u64> {
        self.call(
            "count",
            &Request::Count {
                selection,
                where_clause: selection.predicate.where_clause(),
            },
        )
    }

    fn repair_geometry(&self, feature: &VectorRef) -> EngineResult<()> {
        self.call("repair_geometry", &Request::Feature { feature })
    }

    fn list_feature_classes(&self, workspace: &Workspace) -> EngineResult<Vec<FeatureClassEntry>> {
        let paths: Vec<VectorRef> =
            self.call("list_feature_classes", &Request::InWorkspace { workspace })?;
        Ok(paths
            .into_iter()
            .map(|path| FeatureClassEntry {
                name: path.name().to_string(),
                path,
            })
            .collect())
    }

    fn export_features(&self, selection: &Selection, out: &VectorRef) -> EngineResult<()> {
        self.call(
            "export_features",
            &Request::Export {
                selection,
                where_clause: selection.predicate.where_clause(),
                out,
            },
        )
    }
}
