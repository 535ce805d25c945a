//! Built-in patch plans for framework and services trees.
//!
//! Each preset is an ordered rule list plus the files it targets, relative
//! to the unpacked root (`framework_unpacked/`, `services_unpacked/`, ...).

use clap::ValueEnum;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::batch::TargetGroup;
use crate::plan::PatchPlan;
use crate::rule::{Action, InjectMode, LineMatcher, PatchRule};
use crate::signature::MethodMatcher;

const TOOLBOX_UTILS: &str = "Lcom/android/internal/util/kaorios/ToolboxUtils;";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Disable the minimum APK signature scheme check.
    SignatureBypass,
    /// Defuse `invoke-custom` record methods that bootloop on A15.
    BootloopSweep,
    /// Feature spoofing and keystore hooks.
    FeatureInjection,
}

impl Preset {
    pub const ALL: [Preset; 3] = [
        Preset::BootloopSweep,
        Preset::SignatureBypass,
        Preset::FeatureInjection,
    ];

    pub fn plan(self) -> PatchPlan {
        match self {
            Preset::SignatureBypass => signature_bypass_plan(),
            Preset::BootloopSweep => bootloop_plan(),
            Preset::FeatureInjection => feature_injection_plan(),
        }
    }
}

fn lines(text: &[&str]) -> Vec<String> {
    text.iter().map(|line| line.to_string()).collect()
}

/// Separates every instruction with a blank line, the way baksmali does.
fn spaced(text: &[&str]) -> Vec<String> {
    text.iter()
        .flat_map(|line| [line.to_string(), String::new()])
        .collect()
}

pub fn signature_bypass_rules() -> Vec<PatchRule> {
    vec![PatchRule::new(
        "return 0 from getMinimumSignatureSchemeVersionForTargetSdk",
        MethodMatcher::Contains("getMinimumSignatureSchemeVersionForTargetSdk".into()),
        Action::ReplaceBody {
            lines: spaced(&[".registers 1", "const/4 v0, 0x0", "return v0"]),
        },
    )]
}

fn signature_bypass_plan() -> PatchPlan {
    PatchPlan {
        name: "signature-bypass".to_string(),
        optional: true,
        targets: vec![TargetGroup::new(
            "framework_unpacked/smali_classes4",
            &["android/util/apk/ApkSignatureVerifier.smali"],
        )],
        rules: signature_bypass_rules(),
        per_file: BTreeMap::new(),
    }
}

/// Constant bodies for record methods that go through `invoke-custom`.
///
/// Methods are picked by their whole declaration, so `equals` wins over
/// `hashCode` and `toString` for a declaration naming more than one: once a
/// body is replaced it no longer holds `invoke-custom`.
pub fn bootloop_rules() -> Vec<PatchRule> {
    let defuse = |name: &str, body: &[&str]| {
        PatchRule::new(
            format!("defuse {name}"),
            MethodMatcher::DeclarationContains(name.to_string()),
            Action::ReplaceBody { lines: lines(body) },
        )
        .all_occurrences()
        .when_body(LineMatcher::Contains("invoke-custom".into()))
    };
    vec![
        defuse("equals", &[".registers 2", "const/4 v0, 0x0", "return v0"]),
        defuse("hashCode", &[".registers 1", "const/4 v0, 0x0", "return v0"]),
        defuse("toString", &[".registers 1", "const/4 v0, 0x0", "return-object v0"]),
    ]
}

fn bootloop_plan() -> PatchPlan {
    PatchPlan {
        name: "bootloop-sweep".to_string(),
        optional: false,
        targets: vec![
            TargetGroup::new(
                "framework_unpacked/smali_classes2",
                &[
                    "android/hardware/input/KeyboardLayoutPreviewDrawable$GlyphDrawable.smali",
                    "android/hardware/input/PhysicalKeyLayout$EnterKey.smali",
                    "android/hardware/input/PhysicalKeyLayout$LayoutKey.smali",
                    "android/media/MediaRouter2$InstanceInvalidatedCallbackRecord.smali",
                    "android/media/MediaRouter2$PackageNameUserHandlePair.smali",
                ],
            ),
            TargetGroup::new(
                "services_unpacked/smali_classes",
                &["com/android/server/BinaryTransparencyService$Digest.smali"],
            ),
            TargetGroup::new(
                "services_unpacked/smali_classes2",
                &[
                    "com/android/server/inputmethod/AdditionalSubtypeMapRepository$WriteTask.smali",
                    "com/android/server/policy/PhoneWindowManager$SwitchKeyboardLayoutMessageObject.smali",
                    "com/android/server/policy/SingleKeyGestureDetector$MessageObject.smali",
                ],
            ),
            TargetGroup::new(
                "miui_services_unpacked/smali_classes",
                &[
                    "com/android/server/am/BroadcastQueueModernStubImpl$ActionCount.smali",
                    "com/android/server/input/InputDfsReportStubImpl$MessageObject.smali",
                    "com/android/server/input/InputOneTrackUtil$TrackEventListData.smali",
                    "com/android/server/input/InputOneTrackUtil$TrackEventStringData.smali",
                    "com/android/server/policy/MiuiScreenOnProximityLock$AcquireMessageObject.smali",
                    "com/android/server/policy/MiuiScreenOnProximityLock$ReleaseMessageObject.smali",
                ],
            ),
        ],
        rules: bootloop_rules(),
        per_file: BTreeMap::new(),
    }
}

pub fn application_package_manager_rules() -> Vec<PatchRule> {
    let field = lines(&[".field private final mContext:Landroid/content/Context;", ""]);
    let constructor = lines(&[
        ".method public constructor <init>(Landroid/content/Context;)V",
        "    .registers 2",
        "",
        "    invoke-direct {p0}, Ljava/lang/Object;-><init>()V",
        "",
        "    iput-object p1, p0, Landroid/app/ApplicationPackageManager;->mContext:Landroid/content/Context;",
        "",
        "    return-void",
        "",
        ".end method",
        "",
    ]);
    let has_feature = spaced(&[
        ".registers 3",
        "const/4 v0, 0x0",
        "invoke-virtual {p0, p1, v0}, Landroid/app/ApplicationPackageManager;->hasSystemFeature(Ljava/lang/String;I)Z",
        "move-result p0",
        "invoke-static {p0, p1}, Lcom/android/internal/util/kaorios/ToolboxUtils;->KaoriosAttestationBL(ZLjava/lang/String;)Z",
        "move-result p0",
        "return p0",
    ]);
    let feature_lists = spaced(&[
        "invoke-static {}, Landroid/app/ActivityThread;->currentPackageName()Ljava/lang/String;",
        "move-result-object v0",
        "iget-object v1, p0, Landroid/app/ApplicationPackageManager;->mContext:Landroid/content/Context;",
        "invoke-static {}, Lcom/android/internal/util/kaorios/KaoriFeaturesUtils;->getAppLog()Ljava/lang/String;",
        "move-result-object v2",
        "const/4 v3, 0x1",
        "invoke-static {v1, v2, v3}, Lcom/android/internal/util/kaorios/SettingsHelper;->isToggleEnabled(Landroid/content/Context;Ljava/lang/String;Z)Z",
        "move-result v1",
        "invoke-static {}, Lcom/android/internal/util/kaorios/KaoriFeaturesUtils;->getFeaturesPixel()[Ljava/lang/String;",
        "move-result-object v2",
        "invoke-static {}, Lcom/android/internal/util/kaorios/KaoriFeaturesUtils;->getFeaturesPixelOthers()[Ljava/lang/String;",
        "move-result-object v4",
        "invoke-static {}, Lcom/android/internal/util/kaorios/KaoriFeaturesUtils;->getFeaturesTensor()[Ljava/lang/String;",
        "move-result-object v5",
        "invoke-static {}, Lcom/android/internal/util/kaorios/KaoriFeaturesUtils;->getFeaturesNexus()[Ljava/lang/String;",
        "move-result-object v6",
    ]);

    vec![
        PatchRule::insert_member("add context field", "# static fields", field),
        PatchRule::insert_member("add context constructor", "# direct methods", constructor),
        PatchRule::new(
            "route hasSystemFeature(String) through attestation",
            MethodMatcher::Contains("hasSystemFeature(Ljava/lang/String;)Z".into()),
            Action::ReplaceBody { lines: has_feature },
        ),
        PatchRule::new(
            "widen hasSystemFeature(String, int) frame",
            MethodMatcher::Contains("hasSystemFeature(Ljava/lang/String;I)Z".into()),
            Action::SetRegisterCount { count: 12 },
        ),
        PatchRule::new(
            "load feature lists before cache lookup",
            MethodMatcher::Contains("hasSystemFeature(Ljava/lang/String;I)Z".into()),
            Action::InjectBefore {
                marker: LineMatcher::Contains("mHasSystemFeatureCache".into()),
                lines: feature_lists,
                mode: InjectMode::All,
            },
        ),
    ]
}

pub fn instrumentation_rules() -> Vec<PatchRule> {
    let props_hook = |name: &str, header: &str, context: &str| {
        PatchRule::new(
            name,
            MethodMatcher::StartsWith(header.to_string()),
            Action::InjectBefore {
                marker: LineMatcher::Equals("return-object v0".into()),
                lines: vec![format!(
                    "invoke-static {{{context}}}, {TOOLBOX_UTILS}->KaoriosProps(Landroid/content/Context;)V"
                )],
                mode: InjectMode::First,
            },
        )
    };
    vec![
        props_hook(
            "spoof props in static newApplication",
            ".method public static whitelist newApplication(Ljava/lang/Class;Landroid/content/Context;)Landroid/app/Application;",
            "p1",
        ),
        props_hook(
            "spoof props in newApplication",
            ".method public whitelist newApplication(Ljava/lang/ClassLoader;Ljava/lang/String;Landroid/content/Context;)Landroid/app/Application;",
            "p3",
        ),
    ]
}

pub fn keystore2_rules() -> Vec<PatchRule> {
    vec![PatchRule::new(
        "wrap getKeyEntry response",
        MethodMatcher::StartsWith(".method public blacklist getKeyEntry(".into()),
        Action::InjectBefore {
            marker: LineMatcher::Equals("return-object v0".into()),
            lines: vec![
                format!(
                    "invoke-static {{v0}}, {TOOLBOX_UTILS}->KaoriosKeybox(Landroid/system/keystore2/KeyEntryResponse;)Landroid/system/keystore2/KeyEntryResponse;"
                ),
                "move-result-object v0".to_string(),
            ],
            mode: InjectMode::First,
        },
    )]
}

pub fn android_keystore_spi_rules() -> Vec<PatchRule> {
    vec![PatchRule::new(
        "spoof props in engineGetCertificateChain",
        MethodMatcher::StartsWith(".method public whitelist test-api engineGetCertificateChain".into()),
        Action::InjectAfter {
            marker: LineMatcher::Contains("registers".into()),
            lines: vec![format!(
                "invoke-static {{}}, {TOOLBOX_UTILS}->KaoriosPropsEngineGetCertificateChain()V"
            )],
            mode: InjectMode::First,
        },
    )]
}

fn feature_injection_plan() -> PatchPlan {
    const APP: &str = "framework_unpacked/smali_classes";
    const SECURITY: &str = "framework_unpacked/smali_classes3";
    let per_file = BTreeMap::from([
        (
            format!("{APP}/android/app/ApplicationPackageManager.smali"),
            application_package_manager_rules(),
        ),
        (
            format!("{APP}/android/app/Instrumentation.smali"),
            instrumentation_rules(),
        ),
        (
            format!("{SECURITY}/android/security/KeyStore2.smali"),
            keystore2_rules(),
        ),
        (
            format!("{SECURITY}/android/security/keystore2/AndroidKeyStoreSpi.smali"),
            android_keystore_spi_rules(),
        ),
    ]);
    PatchPlan {
        name: "feature-injection".to_string(),
        optional: true,
        targets: vec![
            TargetGroup::new(
                APP,
                &[
                    "android/app/ApplicationPackageManager.smali",
                    "android/app/Instrumentation.smali",
                ],
            ),
            TargetGroup::new(
                SECURITY,
                &[
                    "android/security/KeyStore2.smali",
                    "android/security/keystore2/AndroidKeyStoreSpi.smali",
                ],
            ),
        ],
        rules: Vec::new(),
        per_file,
    }
}
