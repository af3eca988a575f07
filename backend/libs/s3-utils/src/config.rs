/// S3 configuration shared across services
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// AWS region
    pub region: String,
    /// Base URL for public access (CDN domain or storage gateway)
    pub base_url: String,
    /// Whether to use path-style URLs (false = virtual-hosted-style)
    pub path_style: bool,
    /// Custom endpoint for S3-compatible storage (MinIO, Supabase storage)
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    /// Load S3 configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            base_url: std::env::var("S3_BASE_URL")
                .unwrap_or_else(|_| "https://s3.amazonaws.com".to_string()),
            path_style: std::env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            endpoint: std::env::var("S3_ENDPOINT").ok(),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
        }
    }

    /// Build the public URL of an object
    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if self.path_style {
            format!("{}/{}/{}", self.base_url.trim_end_matches('/'), bucket, key)
        } else {
            format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path_style: bool) -> S3Config {
        S3Config {
            region: "us-east-1".to_string(),
            base_url: "https://cdn.sizzle.app/storage/v1/object/public/".to_string(),
            path_style,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }

    #[test]
    fn test_object_url_virtual_hosted_style() {
        let url = config(false).object_url("videos", "u1/1700000000000.jpg");
        assert_eq!(
            url,
            "https://videos.s3.us-east-1.amazonaws.com/u1/1700000000000.jpg"
        );
    }

    #[test]
    fn test_object_url_path_style() {
        let url = config(true).object_url("videos", "/u1/1700000000000.jpg");
        assert_eq!(
            url,
            "https://cdn.sizzle.app/storage/v1/object/public/videos/u1/1700000000000.jpg"
        );
    }
}
