//! Boot-time payload handed to the compute instance
//!
//! The orchestrator never interprets the payload. It is read from a file or
//! rendered from the built-in compose setup script and passed through to
//! instance creation as-is.

use crate::error::Result;
use std::path::Path;

const REPOSITORY_PLACEHOLDER: &str = "{{repository}}";

/// Docker Compose application setup for Amazon Linux.
///
/// Installs Docker with the compose plugin, clones the repository and starts
/// `docker compose up`. Application secrets are generated on the instance.
pub const COMPOSE_APP_SETUP: &str = r#"#!/bin/bash
set -e

echo "=== stackup: compose application setup ==="

yum update -y
yum install -y docker git curl openssl

systemctl enable docker
systemctl start docker
usermod -a -G docker ec2-user

mkdir -p /usr/local/lib/docker/cli-plugins
curl -SL https://github.com/docker/compose/releases/latest/download/docker-compose-linux-x86_64 \
    -o /usr/local/lib/docker/cli-plugins/docker-compose
chmod +x /usr/local/lib/docker/cli-plugins/docker-compose

cd /home/ec2-user
REPO_URL="{{repository}}"
APP_DIR=$(basename "$REPO_URL" .git)
if [ ! -d "$APP_DIR" ]; then
    git clone "$REPO_URL" "$APP_DIR"
fi
cd "$APP_DIR"

if [ -f .env.example ] && [ ! -f .env ]; then
    cp .env.example .env
    echo "JWT_SECRET=$(openssl rand -base64 32)" >> .env
fi

# Docker needs a moment after first start
sleep 10
docker compose up -d --build
docker compose ps

chown -R ec2-user:ec2-user "/home/ec2-user/$APP_DIR"

echo "✅ stackup: application started"
"#;

/// Opaque instance user data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootPayload(Vec<u8>);

impl BootPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Read a script file verbatim
    pub async fn from_file(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Loaded boot script");
        Ok(Self(bytes))
    }

    /// Built-in compose setup for `repository`
    pub fn compose_app(repository: &str) -> Self {
        Self(
            COMPOSE_APP_SETUP
                .replace(REPOSITORY_PLACEHOLDER, repository)
                .into_bytes(),
        )
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_app_renders_repository() {
        let payload = BootPayload::compose_app("https://example.com/app.git");
        let script = String::from_utf8(payload.as_bytes().to_vec()).unwrap();

        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("REPO_URL=\"https://example.com/app.git\""));
        assert!(!script.contains(REPOSITORY_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_from_file_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.sh");
        std::fs::write(&path, b"#!/bin/sh\necho hi\n").unwrap();

        let payload = BootPayload::from_file(&path).await.unwrap();
        assert_eq!(payload.as_bytes(), b"#!/bin/sh\necho hi\n");
    }

    #[test]
    fn test_empty() {
        assert!(BootPayload::empty().is_empty());
    }
}
