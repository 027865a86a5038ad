//! Template context: the LDAP settings the mail server's config files need.

use serde::{Deserialize, Serialize};

use mailsync_core::SyncConfig;

use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateContext {
    pub ldap_uri: String,
    pub ldap_base_dn: String,
    pub ldap_bind_dn: String,
    pub ldap_bind_password: String,
    pub ldap_user_filter: String,
    /// SOGo speaks its own filter dialect, so it gets a separate filter.
    pub ldap_sogo_user_filter: String,
}

impl TemplateContext {
    pub fn from_config(config: &SyncConfig) -> Self {
        let ldap = &config.ldap;
        Self {
            ldap_uri: ldap.uri.clone(),
            ldap_base_dn: ldap.base_dn.clone(),
            ldap_bind_dn: ldap.bind_dn.clone(),
            ldap_bind_password: ldap.bind_password.clone(),
            ldap_user_filter: ldap.user_filter.clone(),
            ldap_sogo_user_filter: ldap.sogo_user_filter.clone(),
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_field_reaches_tera() {
        let ctx = TemplateContext {
            ldap_uri: "ldaps://dc.x.org".into(),
            ldap_base_dn: "DC=x,DC=org".into(),
            ldap_bind_dn: "CN=sync,DC=x,DC=org".into(),
            ldap_bind_password: "secret".into(),
            ldap_user_filter: "(objectClass=user)".into(),
            ldap_sogo_user_filter: "objectClass='user'".into(),
        };
        let tera_ctx = ctx.to_tera_context().expect("context conversion");
        for key in [
            "ldap_uri",
            "ldap_base_dn",
            "ldap_bind_dn",
            "ldap_bind_password",
            "ldap_user_filter",
            "ldap_sogo_user_filter",
        ] {
            assert!(tera_ctx.contains_key(key), "missing {key}");
        }
    }
}
