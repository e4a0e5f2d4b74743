use aws_config::retry::RetryConfig;
use aws_config::SdkConfig;
use aws_sdk_ec2::Region;
use aws_smithy_types::retry::RetryMode;
use log::info;

/// Load the SDK config from the default credential chain with the given
/// region and adaptive retries.
pub async fn sdk_config(region: &str) -> SdkConfig {
    info!("Using region '{}' for the aws config.", region);
    aws_config::from_env()
        .retry_config(
            RetryConfig::standard()
                .with_retry_mode(RetryMode::Adaptive)
                .with_max_attempts(15),
        )
        .region(Region::new(region.to_string()))
        .load()
        .await
}
