use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, GenericParam, LitStr};

#[proc_macro_derive(NamedVecOps)]
pub fn named_vec_ops_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    // The scalar is the first type parameter, e.g. `T` in `State<T>`.
    let scalar = input.generics.params.iter().find_map(|param| match param {
        GenericParam::Type(ty) => Some(ty.ident.clone()),
        _ => None,
    });
    let scalar = match scalar {
        Some(ident) => ident,
        None => panic!("NamedVecOps needs a generic scalar parameter, e.g. `struct State<T>`"),
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let extra_predicates = where_clause.map(|w| {
        let predicates = &w.predicates;
        quote! { #predicates, }
    });

    let fields = match &input.data {
        Data::Struct(data_struct) => {
            if let Fields::Named(fields_named) = &data_struct.fields {
                &fields_named.named
            } else {
                panic!("NamedVecOps can only be derived for structs with named fields");
            }
        }
        _ => panic!("NamedVecOps can only be derived for structs"),
    };

    let n_fields = fields.len();
    let n_literal = syn::Index::from(n_fields);
    let field_names: Vec<_> = fields.iter().map(|f| &f.ident).collect();
    let field_indexes: Vec<_> = (0..n_fields).map(syn::Index::from).collect();
    let field_labels: Vec<_> = fields
        .iter()
        .filter_map(|f| f.ident.as_ref())
        .map(|ident| LitStr::new(&ident.to_string(), ident.span()))
        .collect();

    let add_fields = field_names.iter().map(|field| {
        quote! { #field: self.#field + rhs.#field }
    });

    let sub_fields = field_names.iter().map(|field| {
        quote! { #field: self.#field - rhs.#field }
    });

    let add_assign_fields = field_names.iter().map(|field| {
        quote! { self.#field = self.#field + rhs.#field; }
    });

    let sub_assign_fields = field_names.iter().map(|field| {
        quote! { self.#field = self.#field - rhs.#field; }
    });

    let mul_fields = field_names.iter().map(|field| {
        quote! { #field: self.#field * rhs }
    });

    let expanded = quote! {
        impl #impl_generics named_vec_ops::NamedVecOps<#scalar, #n_literal> for #name #ty_generics
        where
            #extra_predicates
            #scalar: Copy + ::nalgebra::Scalar,
        {
            const NAMES: [&'static str; #n_literal] = [#(#field_labels),*];

            fn to_svector(&self) -> ::nalgebra::SVector<#scalar, #n_literal> {
                ::nalgebra::SVector::from([
                    #(self.#field_names),*
                ])
            }

            fn from_svector(v: &::nalgebra::SVector<#scalar, #n_literal>) -> Self {
                Self {
                    #(#field_names: v[#field_indexes]),*
                }
            }
        }

        impl #impl_generics std::ops::Add for #name #ty_generics
        where
            #extra_predicates
            #scalar: Copy + std::ops::Add<Output = #scalar>,
        {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self {
                    #(#add_fields),*
                }
            }
        }

        impl #impl_generics std::ops::Sub for #name #ty_generics
        where
            #extra_predicates
            #scalar: Copy + std::ops::Sub<Output = #scalar>,
        {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self {
                    #(#sub_fields),*
                }
            }
        }

        impl #impl_generics std::ops::AddAssign for #name #ty_generics
        where
            #extra_predicates
            #scalar: Copy + std::ops::Add<Output = #scalar>,
        {
            fn add_assign(&mut self, rhs: Self) {
                #(#add_assign_fields)*
            }
        }

        impl #impl_generics std::ops::SubAssign for #name #ty_generics
        where
            #extra_predicates
            #scalar: Copy + std::ops::Sub<Output = #scalar>,
        {
            fn sub_assign(&mut self, rhs: Self) {
                #(#sub_assign_fields)*
            }
        }

        // scaling by the scalar; `scalar * struct` would break the orphan rule
        impl #impl_generics std::ops::Mul<#scalar> for #name #ty_generics
        where
            #extra_predicates
            #scalar: Copy + std::ops::Mul<Output = #scalar>,
        {
            type Output = Self;

            fn mul(self, rhs: #scalar) -> Self {
                Self {
                    #(#mul_fields),*
                }
            }
        }
    };

    TokenStream::from(expanded)
}
