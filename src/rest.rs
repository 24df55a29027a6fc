//! REST contract (spec §6): a contract, not a framework — this module maps
//! the documented verb/path table onto core events and shapes the
//! responses a host HTTP server is expected to return. Binding this to an
//! actual socket is left to the host; nothing in the corpus this core was
//! grounded on ships an HTTP server crate, so none is fabricated here.

use serde_json::{json, Value as Json};

use crate::boot::Core;
use crate::error::CoreError;
use crate::value::DeviceValue;

/// One parsed REST request, already matched against the route table in
/// spec §6.
pub enum Route<'a> {
    /// `GET /api/v1/devices`.
    ListDevices,
    /// `GET /api/v1/devices`, `Accept: application/octet-stream`.
    BackupPartition,
    /// `POST /api/v1/devices`, `Content-Type: application/octet-stream`.
    RestorePartition {
        /// Raw bytes of the uploaded partition image.
        image: &'a [u8],
    },
    /// `POST /api/v1/devices` with a JSON body.
    AddDevice {
        /// Driver type name (`driver_type` in the body).
        driver_type: &'a str,
        /// Display name (`description` in the body).
        description: &'a str,
        /// Driver-specific creation payload (`driver_param`), as raw JSON text.
        driver_param: &'a str,
    },
    /// `PUT /api/v1/devices/{i}`: add-or-replace at a fixed index.
    AddDeviceAt {
        /// Target slot index.
        index: usize,
        /// Driver type name.
        driver_type: &'a str,
        /// Display name.
        description: &'a str,
        /// Driver-specific creation payload, as raw JSON text.
        driver_param: &'a str,
    },
    /// `GET /api/v1/devices/{i}`.
    ReadDevice {
        /// Target slot index.
        index: usize,
        /// Selector to read.
        what: &'a str,
    },
    /// `GET /api/v1/devices/{i}/info`.
    DeviceInfo {
        /// Target slot index.
        index: usize,
    },
    /// `PUT /api/v1/devices/{i}/{what}`.
    WriteDeviceOptions {
        /// Target slot index.
        index: usize,
        /// Action name.
        action: &'a str,
        /// Raw JSON request body.
        input: &'a str,
    },
    /// `DELETE /api/v1/devices/{i}`.
    RemoveDevice {
        /// Target slot index.
        index: usize,
    },
    /// `PATCH /api/v1/devices/{i}/{what}`.
    WriteDevice {
        /// Target slot index.
        index: usize,
        /// Selector to write.
        what: &'a str,
        /// Raw JSON request body, decoded into a [`DeviceValue`].
        body: &'a str,
    },
}

/// An HTTP-shaped response: a status code and a JSON body, per spec §6's
/// response-shape table.
#[derive(Debug)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// JSON body (`{"data": ...}` / `{"info": "..."}` / empty for 204).
    pub body: Json,
}

impl Response {
    fn data(value: Json) -> Response {
        Response { status: 200, body: json!({ "data": value }) }
    }

    fn empty() -> Response {
        Response { status: 204, body: Json::Null }
    }

    fn from_core_error(err: CoreError) -> Response {
        let status = match err {
            CoreError::IndexInvalid => 404,
            CoreError::CollectionFull
            | CoreError::MalformedInput { .. }
            | CoreError::AddressCollision { .. }
            | CoreError::ResourceBusy { .. } => 400,
            CoreError::NotSupported { .. } | CoreError::OperationFailure { .. } => 500,
            CoreError::PersistenceFailure { .. } => 500,
        };
        Response { status, body: json!({ "info": err.to_string() }) }
    }
}

/// Octet-stream payload for the raw-partition routes: not representable as
/// a [`Response`]'s JSON body, so callers that matched [`Route::BackupPartition`]
/// handle this return value instead of [`dispatch`]'s normal return.
pub fn backup_partition(core: &Core) -> Result<Vec<u8>, Response> {
    let mut bytes = Vec::new();
    core.store
        .lock()
        .unwrap()
        .backup_partition(&mut |chunk| {
            bytes.extend_from_slice(chunk);
            Ok(())
        })
        .map_err(Response::from_core_error)?;
    Ok(bytes)
}

/// Dispatches one route against `core`, returning the response a host HTTP
/// server should render. [`Route::BackupPartition`] is not handled here
/// (see [`backup_partition`]) since its payload is a raw byte stream, not
/// JSON.
pub fn dispatch(core: &Core, route: Route<'_>) -> Response {
    match route {
        Route::ListDevices => {
            let overview = core.store.lock().unwrap().retrieve_device_overview();
            let entries: Vec<Json> = overview
                .into_iter()
                .map(|e| json!({ "index": e.index, "description": e.name, "driver_name": e.driver_name }))
                .collect();
            Response::data(Json::Array(entries))
        }

        Route::BackupPartition => Response { status: 500, body: json!({ "info": "use backup_partition" }) },

        Route::RestorePartition { image } => {
            let mut cursor = 0usize;
            let result = core.store.lock().unwrap().restore_partition(&mut |buf| {
                if cursor >= image.len() {
                    return Ok(0);
                }
                let n = buf.len().min(image.len() - cursor);
                buf[..n].copy_from_slice(&image[cursor..cursor + n]);
                cursor += n;
                Ok(n)
            });
            match result {
                Ok(()) => Response::empty(),
                Err(err) => Response::from_core_error(err),
            }
        }

        Route::AddDevice { driver_type, description, driver_param } => {
            add_device(core, None, driver_type, description, driver_param)
        }

        Route::AddDeviceAt { index, driver_type, description, driver_param } => {
            add_device(core, Some(index), driver_type, description, driver_param)
        }

        Route::ReadDevice { index, what } => {
            match core.store.lock().unwrap().read_from_device(index, what) {
                Ok(value) => Response::data(serde_json::to_value(value).unwrap()),
                Err(err) => Response::from_core_error(err),
            }
        }

        Route::DeviceInfo { index } => {
            match core.store.lock().unwrap().retrieve_device_info(index) {
                Ok(info) => match serde_json::from_str::<Json>(&info) {
                    Ok(json) => Response::data(json),
                    Err(_) => Response::data(Json::String(info)),
                },
                Err(err) => Response::from_core_error(err),
            }
        }

        Route::WriteDeviceOptions { index, action, input } => {
            match core.store.lock().unwrap().write_device_options(index, action, input) {
                Ok(()) => Response::empty(),
                Err(err) => Response::from_core_error(err),
            }
        }

        Route::RemoveDevice { index } => match core.store.lock().unwrap().remove_device(index) {
            Ok(()) => Response::empty(),
            Err(err) => Response::from_core_error(err),
        },

        Route::WriteDevice { index, what, body } => {
            let value: DeviceValue = match serde_json::from_str(body) {
                Ok(v) => v,
                Err(e) => return Response { status: 400, body: json!({ "info": e.to_string() }) },
            };
            match core.store.lock().unwrap().write_to_device(index, what, value) {
                Ok(()) => Response::empty(),
                Err(err) => Response::from_core_error(err),
            }
        }
    }
}

fn add_device(
    core: &Core,
    index: Option<usize>,
    driver_type: &str,
    description: &str,
    driver_param: &str,
) -> Response {
    let mut store = core.store.lock().unwrap();
    match store.add_device(driver_type, index, description, driver_param) {
        Ok(idx) => Response { status: 200, body: json!({ "index": idx, "info": "Ok added device" }) },
        Err(err) => Response::from_core_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_hal::Arbiter;
    use std::sync::Arc;

    fn core_with_empty_store() -> Core {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::EventStore::boot(Arc::new(Arbiter::new()), dir.path()).unwrap();
        // Leak the tempdir so the mount path stays valid for the test's
        // lifetime; tests are short-lived processes so this is harmless.
        std::mem::forget(dir);
        Core::for_test(store)
    }

    #[test]
    fn add_device_then_read_round_trips() {
        let core = core_with_empty_store();
        let add = dispatch(
            &core,
            Route::AddDevice {
                driver_type: "pin_driver",
                description: "relay",
                driver_param: r#"{"gpio":4,"mode":"output"}"#,
            },
        );
        assert_eq!(add.status, 200);
        assert_eq!(add.body["index"], 0);

        let read = dispatch(&core, Route::ReadDevice { index: 0, what: "enable" });
        assert_eq!(read.status, 200);
    }

    #[test]
    fn read_unknown_index_is_404() {
        let core = core_with_empty_store();
        let read = dispatch(&core, Route::ReadDevice { index: 9, what: "enable" });
        assert_eq!(read.status, 404);
    }

    #[test]
    fn unknown_driver_is_400() {
        let core = core_with_empty_store();
        let add = dispatch(
            &core,
            Route::AddDevice { driver_type: "does_not_exist", description: "x", driver_param: "{}" },
        );
        assert_eq!(add.status, 400);
    }

    #[test]
    fn remove_then_read_is_404() {
        let core = core_with_empty_store();
        dispatch(
            &core,
            Route::AddDevice {
                driver_type: "pin_driver",
                description: "relay",
                driver_param: r#"{"gpio":4,"mode":"output"}"#,
            },
        );
        let remove = dispatch(&core, Route::RemoveDevice { index: 0 });
        assert_eq!(remove.status, 204);
        let read = dispatch(&core, Route::ReadDevice { index: 0, what: "enable" });
        assert_eq!(read.status, 404);
    }

    #[test]
    fn write_with_malformed_body_is_400() {
        let core = core_with_empty_store();
        dispatch(
            &core,
            Route::AddDevice {
                driver_type: "pin_driver",
                description: "relay",
                driver_param: r#"{"gpio":4,"mode":"output"}"#,
            },
        );
        let write = dispatch(&core, Route::WriteDevice { index: 0, what: "enable", body: "not json" });
        assert_eq!(write.status, 400);
    }
}
