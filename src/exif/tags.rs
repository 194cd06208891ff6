//! Statically known tags: names, categories and selector resolution.
//!
//! Tag ids are only meaningful within a namespace: IFD0, IFD1 and the Exif
//! sub-directory share one ([`TagGroup::Image`]), while the GPS and Interop
//! directories number their tags from zero again.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagGroup {
    Image,
    Gps,
    Interop,
}

/// What kind of information a tag carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Camera body, lens, firmware and serial numbers.
    Device,
    /// Position, heading and the GPS sub-directory as a whole.
    Location,
    /// Capture, digitization and modification timestamps.
    Time,
    /// Photographer, owner and copyright.
    Author,
    /// Exposure and shooting settings.
    Capture,
    /// Pixel layout, colour and resolution descriptors.
    Image,
    /// Sub-directory pointers and located data.
    Structure,
    /// Maker notes, comments, identifiers and anything else.
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Self::Device,
        Self::Location,
        Self::Time,
        Self::Author,
        Self::Capture,
        Self::Image,
        Self::Structure,
        Self::Other,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Location => "location",
            Self::Time => "time",
            Self::Author => "author",
            Self::Capture => "capture",
            Self::Image => "image",
            Self::Structure => "structure",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = UnknownSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownSelector(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tag selector '{0}' (expected a tag name, a number such as 0x010F, or @category)")]
pub struct UnknownSelector(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
    pub id: u16,
    pub group: TagGroup,
    pub name: &'static str,
    pub category: Category,
}

const fn image(id: u16, name: &'static str, category: Category) -> TagInfo {
    TagInfo { id, group: TagGroup::Image, name, category }
}

const fn gps(id: u16, name: &'static str) -> TagInfo {
    TagInfo { id, group: TagGroup::Gps, name, category: Category::Location }
}

const fn interop(id: u16, name: &'static str) -> TagInfo {
    TagInfo { id, group: TagGroup::Interop, name, category: Category::Structure }
}

use Category::*;

pub static TAGS: &[TagInfo] = &[
    // IFD0 / IFD1
    image(0x000B, "ProcessingSoftware", Device),
    image(0x00FE, "NewSubfileType", Image),
    image(0x0100, "ImageWidth", Image),
    image(0x0101, "ImageLength", Image),
    image(0x0102, "BitsPerSample", Image),
    image(0x0103, "Compression", Image),
    image(0x0106, "PhotometricInterpretation", Image),
    image(0x010D, "DocumentName", Other),
    image(0x010E, "ImageDescription", Other),
    image(0x010F, "Make", Device),
    image(0x0110, "Model", Device),
    image(0x0111, "StripOffsets", Structure),
    image(0x0112, "Orientation", Image),
    image(0x0115, "SamplesPerPixel", Image),
    image(0x0116, "RowsPerStrip", Image),
    image(0x0117, "StripByteCounts", Structure),
    image(0x011A, "XResolution", Image),
    image(0x011B, "YResolution", Image),
    image(0x011C, "PlanarConfiguration", Image),
    image(0x0128, "ResolutionUnit", Image),
    image(0x012D, "TransferFunction", Image),
    image(0x0131, "Software", Device),
    image(0x0132, "DateTime", Time),
    image(0x013B, "Artist", Author),
    image(0x013C, "HostComputer", Device),
    image(0x013E, "WhitePoint", Image),
    image(0x013F, "PrimaryChromaticities", Image),
    image(0x0142, "TileWidth", Image),
    image(0x0143, "TileLength", Image),
    image(0x0144, "TileOffsets", Structure),
    image(0x0145, "TileByteCounts", Structure),
    image(0x014A, "SubIFDs", Structure),
    image(0x0201, "JPEGInterchangeFormat", Structure),
    image(0x0202, "JPEGInterchangeFormatLength", Structure),
    image(0x0211, "YCbCrCoefficients", Image),
    image(0x0212, "YCbCrSubSampling", Image),
    image(0x0213, "YCbCrPositioning", Image),
    image(0x0214, "ReferenceBlackWhite", Image),
    image(0x02BC, "XMLPacket", Other),
    image(0x4746, "Rating", Other),
    image(0x4749, "RatingPercent", Other),
    image(0x8298, "Copyright", Author),
    image(0x83BB, "IPTCNAA", Other),
    image(0x8649, "ImageResources", Other),
    image(0x8769, "ExifIFD", Structure),
    image(0x8773, "InterColorProfile", Image),
    image(0x8825, "GPSInfo", Location),
    image(0x9C9B, "XPTitle", Other),
    image(0x9C9C, "XPComment", Other),
    image(0x9C9D, "XPAuthor", Author),
    image(0x9C9E, "XPKeywords", Other),
    image(0x9C9F, "XPSubject", Other),
    image(0xC4A5, "PrintIM", Other),
    image(0xC612, "DNGVersion", Image),
    image(0xC614, "UniqueCameraModel", Device),
    // ExifIFD
    image(0x829A, "ExposureTime", Capture),
    image(0x829D, "FNumber", Capture),
    image(0x8822, "ExposureProgram", Capture),
    image(0x8824, "SpectralSensitivity", Capture),
    image(0x8827, "ISOSpeedRatings", Capture),
    image(0x8828, "OECF", Capture),
    image(0x8830, "SensitivityType", Capture),
    image(0x8832, "RecommendedExposureIndex", Capture),
    image(0x9000, "ExifVersion", Structure),
    image(0x9003, "DateTimeOriginal", Time),
    image(0x9004, "DateTimeDigitized", Time),
    image(0x9010, "OffsetTime", Time),
    image(0x9011, "OffsetTimeOriginal", Time),
    image(0x9012, "OffsetTimeDigitized", Time),
    image(0x9101, "ComponentsConfiguration", Image),
    image(0x9102, "CompressedBitsPerPixel", Image),
    image(0x9201, "ShutterSpeedValue", Capture),
    image(0x9202, "ApertureValue", Capture),
    image(0x9203, "BrightnessValue", Capture),
    image(0x9204, "ExposureBiasValue", Capture),
    image(0x9205, "MaxApertureValue", Capture),
    image(0x9206, "SubjectDistance", Capture),
    image(0x9207, "MeteringMode", Capture),
    image(0x9208, "LightSource", Capture),
    image(0x9209, "Flash", Capture),
    image(0x920A, "FocalLength", Capture),
    image(0x9214, "SubjectArea", Capture),
    image(0x927C, "MakerNote", Other),
    image(0x9286, "UserComment", Other),
    image(0x9290, "SubSecTime", Time),
    image(0x9291, "SubSecTimeOriginal", Time),
    image(0x9292, "SubSecTimeDigitized", Time),
    image(0x9400, "Temperature", Capture),
    image(0x9401, "Humidity", Capture),
    image(0x9402, "Pressure", Capture),
    image(0x9403, "WaterDepth", Location),
    image(0x9404, "Acceleration", Capture),
    image(0x9405, "CameraElevationAngle", Capture),
    image(0xA000, "FlashpixVersion", Structure),
    image(0xA001, "ColorSpace", Image),
    image(0xA002, "PixelXDimension", Image),
    image(0xA003, "PixelYDimension", Image),
    image(0xA004, "RelatedSoundFile", Other),
    image(0xA005, "InteropIFD", Structure),
    image(0xA20B, "FlashEnergy", Capture),
    image(0xA20E, "FocalPlaneXResolution", Device),
    image(0xA20F, "FocalPlaneYResolution", Device),
    image(0xA210, "FocalPlaneResolutionUnit", Device),
    image(0xA214, "SubjectLocation", Capture),
    image(0xA215, "ExposureIndex", Capture),
    image(0xA217, "SensingMethod", Device),
    image(0xA300, "FileSource", Device),
    image(0xA301, "SceneType", Capture),
    image(0xA302, "CFAPattern", Device),
    image(0xA401, "CustomRendered", Capture),
    image(0xA402, "ExposureMode", Capture),
    image(0xA403, "WhiteBalance", Capture),
    image(0xA404, "DigitalZoomRatio", Capture),
    image(0xA405, "FocalLengthIn35mmFilm", Capture),
    image(0xA406, "SceneCaptureType", Capture),
    image(0xA407, "GainControl", Capture),
    image(0xA408, "Contrast", Capture),
    image(0xA409, "Saturation", Capture),
    image(0xA40A, "Sharpness", Capture),
    image(0xA40B, "DeviceSettingDescription", Device),
    image(0xA40C, "SubjectDistanceRange", Capture),
    image(0xA420, "ImageUniqueID", Other),
    image(0xA430, "CameraOwnerName", Author),
    image(0xA431, "BodySerialNumber", Device),
    image(0xA432, "LensSpecification", Device),
    image(0xA433, "LensMake", Device),
    image(0xA434, "LensModel", Device),
    image(0xA435, "LensSerialNumber", Device),
    image(0xA460, "CompositeImage", Capture),
    image(0xA500, "Gamma", Image),
    // GPS
    gps(0x0000, "GPSVersionID"),
    gps(0x0001, "GPSLatitudeRef"),
    gps(0x0002, "GPSLatitude"),
    gps(0x0003, "GPSLongitudeRef"),
    gps(0x0004, "GPSLongitude"),
    gps(0x0005, "GPSAltitudeRef"),
    gps(0x0006, "GPSAltitude"),
    gps(0x0007, "GPSTimeStamp"),
    gps(0x0008, "GPSSatellites"),
    gps(0x0009, "GPSStatus"),
    gps(0x000A, "GPSMeasureMode"),
    gps(0x000B, "GPSDOP"),
    gps(0x000C, "GPSSpeedRef"),
    gps(0x000D, "GPSSpeed"),
    gps(0x000E, "GPSTrackRef"),
    gps(0x000F, "GPSTrack"),
    gps(0x0010, "GPSImgDirectionRef"),
    gps(0x0011, "GPSImgDirection"),
    gps(0x0012, "GPSMapDatum"),
    gps(0x0013, "GPSDestLatitudeRef"),
    gps(0x0014, "GPSDestLatitude"),
    gps(0x0015, "GPSDestLongitudeRef"),
    gps(0x0016, "GPSDestLongitude"),
    gps(0x0017, "GPSDestBearingRef"),
    gps(0x0018, "GPSDestBearing"),
    gps(0x0019, "GPSDestDistanceRef"),
    gps(0x001A, "GPSDestDistance"),
    gps(0x001B, "GPSProcessingMethod"),
    gps(0x001C, "GPSAreaInformation"),
    gps(0x001D, "GPSDateStamp"),
    gps(0x001E, "GPSDifferential"),
    gps(0x001F, "GPSHPositioningError"),
    // Interop
    interop(0x0001, "InteropIndex"),
    interop(0x0002, "InteropVersion"),
];

pub fn lookup(group: TagGroup, id: u16) -> Option<&'static TagInfo> {
    TAGS.iter().find(|t| t.group == group && t.id == id)
}

/// Case-insensitive lookup by tag name.
pub fn by_name(name: &str) -> Option<&'static TagInfo> {
    TAGS.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

/// Display name of a tag, or its hex id when the table does not know it.
pub fn describe(group: TagGroup, id: u16) -> String {
    match lookup(group, id) {
        Some(info) => info.name.to_string(),
        None => format!("0x{id:04X}"),
    }
}

pub fn category_of(group: TagGroup, id: u16) -> Category {
    lookup(group, id).map(|t| t.category).unwrap_or(Other)
}

/// Resolve one selector to the tag ids it names.
///
/// Accepts a tag name (`GPSInfo`), a hex or decimal number (`0x010F`, `271`)
/// or a category (`@location`). Categories expand over the IFD0/Exif
/// namespace only: the GPS sub-directory is addressed through its
/// `GPSInfo` pointer, which removes or keeps the directory as a whole.
pub fn resolve(selector: &str) -> Result<Vec<u16>, UnknownSelector> {
    let s = selector.trim();
    if let Some(category) = s.strip_prefix('@') {
        let category: Category = category.parse().map_err(|_| UnknownSelector(s.to_string()))?;
        return Ok(TAGS
            .iter()
            .filter(|t| t.group == TagGroup::Image && t.category == category)
            .map(|t| t.id)
            .collect());
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u16::from_str_radix(hex, 16)
            .map(|id| vec![id])
            .map_err(|_| UnknownSelector(s.to_string()));
    }
    if let Ok(id) = s.parse::<u16>() {
        return Ok(vec![id]);
    }
    by_name(s)
        .map(|t| vec![t.id])
        .ok_or_else(|| UnknownSelector(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_per_group() {
        for (i, a) in TAGS.iter().enumerate() {
            for b in &TAGS[i + 1..] {
                assert!(
                    !(a.group == b.group && a.id == b.id),
                    "duplicate 0x{:04X} ({} / {})",
                    a.id,
                    a.name,
                    b.name
                );
            }
        }
    }

    #[test]
    fn lookup_respects_groups() {
        assert_eq!(lookup(TagGroup::Image, 0x010F).unwrap().name, "Make");
        assert_eq!(lookup(TagGroup::Gps, 0x0002).unwrap().name, "GPSLatitude");
        assert_eq!(lookup(TagGroup::Interop, 0x0002).unwrap().name, "InteropVersion");
        assert!(lookup(TagGroup::Gps, 0x010F).is_none());
        assert_eq!(describe(TagGroup::Image, 0xBEEF), "0xBEEF");
        assert_eq!(category_of(TagGroup::Image, 0xBEEF), Category::Other);
    }

    #[test]
    fn resolves_selectors() {
        assert_eq!(resolve("0x010F").unwrap(), vec![0x010F]);
        assert_eq!(resolve("271").unwrap(), vec![271]);
        assert_eq!(resolve("model").unwrap(), vec![0x0110]);
        assert_eq!(resolve(" GPSInfo ").unwrap(), vec![0x8825]);
        assert_eq!(resolve("@location").unwrap(), vec![0x8825, 0x9403]);

        let time = resolve("@Time").unwrap();
        assert!(time.contains(&0x0132));
        assert!(time.contains(&0x9003));
        assert!(!time.contains(&0x010F));
    }

    #[test]
    fn rejects_unknown_selectors() {
        assert_eq!(resolve("Nope"), Err(UnknownSelector("Nope".to_string())));
        assert!(resolve("@nowhere").is_err());
        assert!(resolve("0xZZ").is_err());
        assert!(resolve("70000").is_err());
    }

    #[test]
    fn category_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.to_string().parse::<Category>().unwrap(), category);
        }
    }
}
