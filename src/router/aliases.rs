//! Fixed alias tables for IaaS and OS-line path segments

/// Path segment reserved for IP-based provider autodetection
pub const AUTO_PROVIDER: &str = "auto";

/// Path segment meaning "no explicit version"
pub const LATEST_VERSION: &str = "latest";

/// Every provider segment the resolver accepts, synonyms included
pub const PROVIDER_SEGMENTS: &[&str] = &[
    "aws",
    "amazon",
    "azure",
    "gcp",
    "google",
    "openstack",
    "softlayer",
    "vsphere",
    "vcloud",
    "lite",
    "boshlite",
];

/// Every OS-line segment the resolver accepts, synonyms included
pub const LINE_SEGMENTS: &[&str] = &[
    "trusty",
    "ubuntu-trusty",
    "ubuntutrusty",
    "t",
    "xenial",
    "ubuntu-xenial",
    "ubuntuxenial",
    "ubuntu",
    "x",
    "windows",
    "windows2016",
    "windows16",
    "windows2012",
    "windows12",
    "centos",
    "centos7",
    "centos-7",
];

/// Map a provider segment to its canonical `<iaas>-<hypervisor>` token
pub fn provider_token(segment: &str) -> Option<&'static str> {
    match segment {
        "aws" | "amazon" => Some("aws-xen-hvm"),
        "azure" => Some("azure-hyperv"),
        "gcp" | "google" => Some("google-kvm"),
        "openstack" => Some("openstack-kvm"),
        "softlayer" => Some("softlayer-xen"),
        "vsphere" => Some("vsphere-esxi"),
        "vcloud" => Some("vcloud-esxi"),
        "lite" | "boshlite" => Some("warden-boshlite"),
        _ => None,
    }
}

/// Map an OS-line segment to its canonical line token
pub fn line_token(segment: &str) -> Option<&'static str> {
    match segment {
        "trusty" | "ubuntu-trusty" | "ubuntutrusty" | "t" => Some("ubuntu-trusty"),
        "xenial" | "ubuntu-xenial" | "ubuntuxenial" | "ubuntu" | "x" => Some("ubuntu-xenial"),
        "windows" | "windows2016" | "windows16" => Some("windows2016"),
        "windows2012" | "windows12" => Some("windows2012R2"),
        "centos" | "centos7" | "centos-7" => Some("centos-7"),
        _ => None,
    }
}
