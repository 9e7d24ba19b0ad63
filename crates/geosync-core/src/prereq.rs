//! Destination prerequisite checks.
//!
//! Workspaces and datastores are never created by a copy; they must already
//! exist on the destination. Every check runs before the first write.

use crate::resources::{StoreRef, WorkspaceRef};
use crate::{CopyError, Side};
use geosync_remote::MapService;
use std::collections::BTreeMap;

/// `Ok(false)` on 404, an error on any other failure.
pub(crate) fn exists(service: &dyn MapService, route: &str) -> Result<bool, CopyError> {
    let resp = service.get(route)?;
    if resp.status == 404 {
        return Ok(false);
    }
    resp.error_for_status()?;
    Ok(true)
}

pub struct PrerequisiteValidator<'a> {
    source_base: &'a str,
    destination: &'a dyn MapService,
    destination_name: &'a str,
}

impl<'a> PrerequisiteValidator<'a> {
    pub fn new(
        source_base: &'a str,
        destination: &'a dyn MapService,
        destination_name: &'a str,
    ) -> Self {
        Self {
            source_base,
            destination,
            destination_name,
        }
    }

    fn route_of(&self, href: &str) -> String {
        href.replacen(self.source_base, "", 1)
    }

    fn exists(&self, route: &str) -> Result<bool, CopyError> {
        exists(self.destination, route)
    }

    pub fn check_workspaces(
        &self,
        workspaces: &BTreeMap<String, Option<WorkspaceRef>>,
    ) -> Result<(), CopyError> {
        for (name, reference) in workspaces {
            let route = match reference {
                Some(ws) => self.route_of(&ws.href),
                None => format!("/rest/workspaces/{name}.json"),
            };
            if !self.exists(&route)? {
                return Err(CopyError::param(
                    Side::Destination,
                    format!("Workspace {name}"),
                    format!(
                        "Workspace {name} not found on destination Geoserver {}",
                        self.destination_name
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn check_datastores(&self, stores: &BTreeMap<String, StoreRef>) -> Result<(), CopyError> {
        for (name, store) in stores {
            if !self.exists(&self.route_of(&store.href))? {
                return Err(CopyError::param(
                    Side::Destination,
                    format!("Datastore {name}"),
                    format!(
                        "Datastore {name} not found on destination Geoserver {}",
                        self.destination_name
                    ),
                ));
            }
        }
        Ok(())
    }
}
