//! GLSL 450 sources for the effect and finishing programs.
//!
//! Textures are always read with `textureLod` so sampling stays valid inside
//! data-dependent control flow.

/// Defined in the export variants, which skip fitting the image to the
/// window aspect ratio.
const EXPORT_DEFINE: &str = "#define EXPORT_PASS 1\n";

const EFFECT_BLOCK: &str = r"
layout(std140, set = 0, binding = 0) uniform EffectParams {
    vec2 uResolution;
    float uImageAspect;
    vec2 uMouse;
    vec2 uCrevice;
    float uVertexScale;
    float uTime;
    float uTemperature;
    float uTint;
    float uContrast;
    vec3 uHSV;
    float uSobel;
    float uMosaic;
    float uBayer;
    float uToon;
    float uToonMin;
    float uToonMax;
    vec2 uShift;
    float shiftScale;
    float uVignette;
    float uVignetteScale;
    vec2 uNoiseIntensity;
    vec2 uNoiseScale;
    float uNoiseTime;
    vec2 uSNoiseIntensity;
    vec2 uSNoiseScale;
    float uSNoiseTime;
} params;
";

const FINISH_BLOCK: &str = r"
layout(std140, set = 0, binding = 0) uniform FinishParams {
    vec2 uResolution;
    float uImageAspect;
    vec2 uMouse;
    vec2 uCrevice;
    float uVertexScale;
    int uBlendMode;
} params;
";

const VERTEX_BODY: &str = r"
layout(location = 0) in vec2 aPosition;
layout(location = 1) in vec2 aTexCoord;
layout(location = 2) in vec2 aCornerOffset;

layout(location = 0) out vec2 vTexCoord;

void main() {
    vec2 crevice = clamp(params.uCrevice, vec2(0.0), vec2(0.95));
    // Each cell shrinks toward its own corner, opening a gap in the middle.
    vec2 p = aPosition * (vec2(1.0) - crevice) + aCornerOffset * crevice;
    p += aCornerOffset * crevice * params.uMouse * 0.05;
    p *= params.uVertexScale;
#ifndef EXPORT_PASS
    float surfaceAspect = params.uResolution.x / max(params.uResolution.y, 1.0);
    vec2 fit = mix(
        vec2(params.uImageAspect / surfaceAspect, 1.0),
        vec2(1.0, surfaceAspect / params.uImageAspect),
        vec2(step(surfaceAspect, params.uImageAspect))
    );
    p *= fit;
#endif
    vTexCoord = aTexCoord;
    gl_Position = vec4(p, 0.0, 1.0);
}
";

const EFFECT_FRAGMENT_BODY: &str = r"
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 outColor;

layout(set = 1, binding = 0) uniform texture2D uImage;
layout(set = 1, binding = 1) uniform sampler uImageSampler;

vec4 sampleImage(vec2 uv) {
    return textureLod(sampler2D(uImage, uImageSampler), uv, 0.0);
}

// Pixel-scale effects count source texels so the live frame and exports of
// any size agree.
vec2 sourceSize() {
    return vec2(textureSize(sampler2D(uImage, uImageSampler), 0));
}

float luma(vec3 c) {
    return dot(c, vec3(0.299, 0.587, 0.114));
}

float hash(vec2 p) {
    return fract(sin(dot(p, vec2(12.9898, 78.233))) * 43758.5453);
}

vec3 mod289v3(vec3 x) {
    return x - floor(x * (1.0 / 289.0)) * 289.0;
}

vec2 mod289v2(vec2 x) {
    return x - floor(x * (1.0 / 289.0)) * 289.0;
}

vec3 permute(vec3 x) {
    return mod289v3((x * 34.0 + vec3(1.0)) * x);
}

float snoise(vec2 v) {
    vec4 C = vec4(0.211324865405187, 0.366025403784439, -0.577350269189626, 0.024390243902439);
    vec2 i = floor(v + vec2(dot(v, C.yy)));
    vec2 x0 = v - i + vec2(dot(i, C.xx));
    vec2 i1 = mix(vec2(0.0, 1.0), vec2(1.0, 0.0), vec2(step(x0.y, x0.x)));
    vec4 x12 = x0.xyxy + C.xxzz - vec4(i1, 0.0, 0.0);
    i = mod289v2(i);
    vec3 p = permute(permute(vec3(i.y) + vec3(0.0, i1.y, 1.0)) + vec3(i.x) + vec3(0.0, i1.x, 1.0));
    vec3 m = max(vec3(0.5) - vec3(dot(x0, x0), dot(x12.xy, x12.xy), dot(x12.zw, x12.zw)), vec3(0.0));
    m = m * m;
    m = m * m;
    vec3 x = fract(p * C.www) * 2.0 - vec3(1.0);
    vec3 h = abs(x) - vec3(0.5);
    vec3 ox = floor(x + vec3(0.5));
    vec3 a0 = x - ox;
    m *= vec3(1.79284291400159) - (a0 * a0 + h * h) * 0.85373472095314;
    vec3 g = vec3(a0.x * x0.x + h.x * x0.y, a0.yz * x12.xz + h.yz * x12.yw);
    return 130.0 * dot(m, g);
}

vec3 rgb2hsv(vec3 c) {
    vec4 K = vec4(0.0, -1.0 / 3.0, 2.0 / 3.0, -1.0);
    vec4 p = mix(vec4(c.bg, K.wz), vec4(c.gb, K.xy), vec4(step(c.b, c.g)));
    vec4 q = mix(vec4(p.xyw, c.r), vec4(c.r, p.yzx), vec4(step(p.x, c.r)));
    float d = q.x - min(q.w, q.y);
    float e = 1.0e-10;
    return vec3(abs(q.z + (q.w - q.y) / (6.0 * d + e)), d / (q.x + e), q.x);
}

vec3 hsv2rgb(vec3 c) {
    vec4 K = vec4(1.0, 2.0 / 3.0, 1.0 / 3.0, 3.0);
    vec3 p = abs(fract(c.xxx + K.xyz) * 6.0 - K.www);
    return mix(K.xxx, clamp(p - K.xxx, vec3(0.0), vec3(1.0)), vec3(c.y)) * c.z;
}

// Ordered 4x4 Bayer threshold for the given dither cell.
float bayer4(vec2 cell) {
    ivec2 p = ivec2(mod(cell, vec2(4.0)));
    int xy = p.x ^ p.y;
    int v = (xy & 1) * 8 + (p.y & 1) * 4 + ((xy / 2) & 1) * 2 + ((p.y / 2) & 1);
    return (float(v) + 0.5) / 16.0;
}

void main() {
    vec2 uv = vTexCoord;

    // Negative cell counts disable mosaic, bayer and toon.
    float cells = max(abs(params.uMosaic), 1.0);
    uv = mix(uv, (floor(uv * cells) + vec2(0.5)) / cells, vec2(step(0.0, params.uMosaic)));

    float drift = snoise(uv * params.uSNoiseScale * 8.0 + vec2(params.uTime * params.uSNoiseTime));
    uv += vec2(drift) * params.uSNoiseIntensity.y * 0.05;

    // Channel shift, rippling outward from the pointer.
    vec2 pointer = vec2(params.uMouse.x * 0.5 + 0.5, 0.5 - params.uMouse.y * 0.5);
    vec2 toPointer = uv - pointer;
    float ripple = sin(length(toPointer) * 40.0 - params.uTime * 4.0);
    vec2 shift = params.uShift * params.shiftScale
        + normalize(toPointer + vec2(1.0e-5)) * ripple * params.shiftScale * 0.25 * length(params.uShift);

    vec4 base = sampleImage(uv);
    vec3 color = vec3(sampleImage(uv + shift).r, base.g, sampleImage(uv - shift).b);

    color += vec3(drift * params.uSNoiseIntensity.x);

    vec2 texel = vec2(1.0) / max(sourceSize(), vec2(1.0));
    float tl = luma(sampleImage(uv + texel * vec2(-1.0, -1.0)).rgb);
    float tc = luma(sampleImage(uv + texel * vec2(0.0, -1.0)).rgb);
    float tr = luma(sampleImage(uv + texel * vec2(1.0, -1.0)).rgb);
    float ml = luma(sampleImage(uv + texel * vec2(-1.0, 0.0)).rgb);
    float mr = luma(sampleImage(uv + texel * vec2(1.0, 0.0)).rgb);
    float bl = luma(sampleImage(uv + texel * vec2(-1.0, 1.0)).rgb);
    float bc = luma(sampleImage(uv + texel * vec2(0.0, 1.0)).rgb);
    float br = luma(sampleImage(uv + texel * vec2(1.0, 1.0)).rgb);
    float gx = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
    float gy = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
    float edge = clamp(length(vec2(gx, gy)), 0.0, 1.0);
    color = mix(color, vec3(edge), vec3(params.uSobel));

    color += vec3(params.uTemperature, params.uTint, -params.uTemperature) * 0.1;
    color = (color - vec3(0.5)) * (params.uContrast * 2.0) + vec3(0.5);

    vec3 hsv = rgb2hsv(clamp(color, vec3(0.0), vec3(1.0)));
    hsv = vec3(
        fract(hsv.x + params.uHSV.x),
        clamp(hsv.y + params.uHSV.y, 0.0, 1.0),
        clamp(hsv.z + params.uHSV.z, 0.0, 1.0)
    );
    color = hsv2rgb(hsv);

    float levels = max(params.uToon, 2.0);
    vec3 toon = clamp(floor(color * levels) / (levels - 1.0), vec3(0.0), vec3(1.0));
    toon = mix(vec3(params.uToonMin), vec3(params.uToonMax), toon);
    color = mix(color, toon, vec3(step(0.0, params.uToon)));

    float threshold = bayer4(floor(vTexCoord * params.uBayer));
    vec3 dithered = step(vec3(threshold), color);
    color = mix(color, dithered, vec3(step(0.0, params.uBayer)));

    vec2 grain = floor(vTexCoord * sourceSize() / max(params.uNoiseScale, vec2(0.001)));
    float tick = floor(params.uTime * params.uNoiseTime * 24.0);
    float lumaNoise = hash(grain + vec2(tick)) - 0.5;
    vec3 colorNoise = vec3(
        hash(grain + vec2(tick, 1.7)),
        hash(grain + vec2(3.1, tick)),
        hash(grain - vec2(tick))
    ) - vec3(0.5);
    color += vec3(lumaNoise * params.uNoiseIntensity.x) + colorNoise * params.uNoiseIntensity.y;

    vec2 centered = (vTexCoord - vec2(0.5)) * params.uVignetteScale * 2.0;
    float falloff = clamp(1.0 - dot(centered, centered) * 0.5, 1.0e-4, 1.0);
    color *= pow(falloff, params.uVignette);

    outColor = vec4(clamp(color, vec3(0.0), vec3(1.0)), base.a);
}
";

const FINISH_FRAGMENT_BODY: &str = r"
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 outColor;

layout(set = 1, binding = 0) uniform texture2D uFirst;
layout(set = 1, binding = 1) uniform sampler uFirstSampler;
layout(set = 1, binding = 2) uniform texture2D uSecond;
layout(set = 1, binding = 3) uniform sampler uSecondSampler;

vec3 blend(vec4 a, vec4 b, int mode) {
    if (mode == 1) {
        return a.rgb * a.a + b.rgb * (1.0 - a.a);
    }
    if (mode == 2) {
        return a.rgb + b.rgb;
    }
    if (mode == 3) {
        return a.rgb - b.rgb;
    }
    if (mode == 4) {
        return b.rgb - a.rgb;
    }
    if (mode == 5) {
        return a.rgb * b.rgb;
    }
    if (mode == 6) {
        return vec3(1.0) - (vec3(1.0) - a.rgb) * (vec3(1.0) - b.rgb);
    }
    if (mode == 7) {
        return min(a.rgb, b.rgb);
    }
    if (mode == 8) {
        return max(a.rgb, b.rgb);
    }
    if (mode == 9) {
        return abs(a.rgb - b.rgb);
    }
    if (mode == 10) {
        return a.rgb + b.rgb - 2.0 * a.rgb * b.rgb;
    }
    return a.rgb;
}

void main() {
    vec4 first = textureLod(sampler2D(uFirst, uFirstSampler), vTexCoord, 0.0);
    vec4 second = textureLod(sampler2D(uSecond, uSecondSampler), vTexCoord, 0.0);
    vec3 color = clamp(blend(first, second, params.uBlendMode), vec3(0.0), vec3(1.0));
    outColor = vec4(color, max(first.a, second.a));
}
";

fn assemble(export: bool, block: &str, body: &str) -> String {
    let define = if export { EXPORT_DEFINE } else { "" };
    format!("#version 450\n{define}{block}{body}")
}

pub(crate) fn effect_vertex(export: bool) -> String {
    assemble(export, EFFECT_BLOCK, VERTEX_BODY)
}

pub(crate) fn effect_fragment() -> String {
    assemble(false, EFFECT_BLOCK, EFFECT_FRAGMENT_BODY)
}

pub(crate) fn finish_vertex(export: bool) -> String {
    assemble(export, FINISH_BLOCK, VERTEX_BODY)
}

pub(crate) fn finish_fragment() -> String {
    assemble(false, FINISH_BLOCK, FINISH_FRAGMENT_BODY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_variants_differ_only_by_define() {
        let live = effect_vertex(false);
        let export = effect_vertex(true);
        assert!(!live.contains("EXPORT_PASS 1"));
        assert_eq!(export.replace(EXPORT_DEFINE, ""), live);
        assert!(finish_vertex(true).contains("EXPORT_PASS 1"));
    }

    #[test]
    fn pixel_scale_effects_follow_the_source_texture() {
        let fragment = effect_fragment();
        let body = &fragment[fragment.find("void main()").unwrap()..];
        assert!(body.contains("vec2 texel = vec2(1.0) / max(sourceSize(), vec2(1.0));"));
        assert!(body.contains("floor(vTexCoord * sourceSize()"));
        assert!(!body.contains("uResolution"));
    }

    #[test]
    fn every_source_starts_with_the_version_directive() {
        for source in [
            effect_vertex(false),
            effect_vertex(true),
            effect_fragment(),
            finish_vertex(false),
            finish_vertex(true),
            finish_fragment(),
        ] {
            assert!(source.starts_with("#version 450\n"));
        }
    }
}
