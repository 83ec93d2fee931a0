// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

const PAUSE_IMAGE: &str = "eks/pause:3.5";
const DEFAULT_ACCOUNT: &str = "602401143452";

/// Registry accounts for regions that don't use the default one.
const REGION_ACCOUNTS: &[(&str, &str)] = &[
    ("af-south-1", "877085696533"),
    ("ap-east-1", "800184023465"),
    ("cn-north-1", "918309763551"),
    ("cn-northwest-1", "961992271922"),
    ("eu-south-1", "590381155156"),
    ("me-south-1", "558608220178"),
    ("us-gov-east-1", "151742754352"),
    ("us-gov-west-1", "013241004608"),
];

fn dns_suffix(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    }
}

/// The pause container image for `region`.
pub fn sandbox_image(region: &str) -> String {
    let account = REGION_ACCOUNTS
        .iter()
        .find(|(r, _)| *r == region)
        .map_or(DEFAULT_ACCOUNT, |&(_, account)| account);
    format!(
        "{account}.dkr.ecr.{region}.{}/{PAUSE_IMAGE}",
        dns_suffix(region)
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sandbox_images() {
        assert_eq!(
            sandbox_image("us-west-2"),
            "602401143452.dkr.ecr.us-west-2.amazonaws.com/eks/pause:3.5"
        );
        assert_eq!(
            sandbox_image("ap-east-1"),
            "800184023465.dkr.ecr.ap-east-1.amazonaws.com/eks/pause:3.5"
        );
        assert_eq!(
            sandbox_image("cn-north-1"),
            "918309763551.dkr.ecr.cn-north-1.amazonaws.com.cn/eks/pause:3.5"
        );
    }
}
